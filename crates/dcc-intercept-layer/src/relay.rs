//! Environment relay: the side channel that carries the diagnostic record to
//! the external tool.
//!
//! The tool is a child process, so the record travels in the inherited
//! environment. Every write goes through [`Relay::publish`]: last write wins
//! and nothing ever reads a value back to modify it. There is deliberately no
//! way to remove a key.

use std::collections::BTreeMap;
use std::ffi::CStr;
use std::fmt;

use crate::macros::StackWriter;

/// Largest value the environment relay publishes, terminator included.
pub const MAX_VALUE_LEN: usize = 8192;

/// Fields of the diagnostic record, named by the variable the tool reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagKey {
    Binary,
    Pid,
    Sanitizer,
    ToolPath,
    ValgrindRunning,
    Signal,
    AsanError,
    UbsanKind,
    UbsanMessage,
    UbsanFilename,
    UbsanLine,
    UbsanColumn,
    UbsanMemoryAddr,
}

impl DiagKey {
    /// The six undefined-behavior fields, in publish order.
    pub const UBSAN: [DiagKey; 6] = [
        DiagKey::UbsanKind,
        DiagKey::UbsanMessage,
        DiagKey::UbsanFilename,
        DiagKey::UbsanLine,
        DiagKey::UbsanColumn,
        DiagKey::UbsanMemoryAddr,
    ];

    pub const fn env_name(self) -> &'static CStr {
        match self {
            DiagKey::Binary => c"DCC_BINARY",
            DiagKey::Pid => c"DCC_PID",
            DiagKey::Sanitizer => c"DCC_SANITIZER",
            DiagKey::ToolPath => c"DCC_PATH",
            DiagKey::ValgrindRunning => c"DCC_VALGRIND_RUNNING",
            DiagKey::Signal => c"DCC_SIGNAL",
            DiagKey::AsanError => c"DCC_ASAN_ERROR",
            DiagKey::UbsanKind => c"DCC_UBSAN_ERROR_KIND",
            DiagKey::UbsanMessage => c"DCC_UBSAN_ERROR_MESSAGE",
            DiagKey::UbsanFilename => c"DCC_UBSAN_ERROR_FILENAME",
            DiagKey::UbsanLine => c"DCC_UBSAN_ERROR_LINE",
            DiagKey::UbsanColumn => c"DCC_UBSAN_ERROR_COL",
            DiagKey::UbsanMemoryAddr => c"DCC_UBSAN_ERROR_MEMORYADDR",
        }
    }

    pub fn as_str(self) -> &'static str {
        // All names are ASCII literals.
        self.env_name().to_str().unwrap_or("")
    }
}

impl fmt::Display for DiagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Relay {
    /// Publish `value` under `key`, replacing any earlier value.
    fn publish(&mut self, key: DiagKey, value: &str);

    /// Publish a formatted value without allocating.
    fn publish_fmt(&mut self, key: DiagKey, args: fmt::Arguments<'_>) {
        use std::fmt::Write;
        let mut buf = [0u8; 128];
        let mut writer = StackWriter::new(&mut buf);
        let _ = writer.write_fmt(args);
        self.publish(key, writer.as_str());
    }
}

/// Relay backed by the process environment (`setenv(3)`).
///
/// Called from fault context; `setenv` may allocate, which is an accepted risk.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvRelay;

impl Relay for EnvRelay {
    fn publish(&mut self, key: DiagKey, value: &str) {
        use std::fmt::Write;
        let mut buf = [0u8; MAX_VALUE_LEN];
        let mut writer = StackWriter::for_c_string(&mut buf);
        let _ = writer.write_str(value);
        let c_value = writer.as_c_str();
        unsafe { libc::setenv(key.env_name().as_ptr(), c_value.as_ptr(), 1) };
        dcc_debug!("setenv {}={}", key, value);
    }
}

/// In-memory diagnostic record.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    fields: BTreeMap<DiagKey, String>,
}

impl DiagnosticRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: DiagKey) -> Option<&str> {
        self.fields.get(&key).map(String::as_str)
    }

    pub fn contains(&self, key: DiagKey) -> bool {
        self.fields.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DiagKey, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl Relay for DiagnosticRecord {
    fn publish(&mut self, key: DiagKey, value: &str) {
        self.fields.insert(key, value.to_string());
    }
}
