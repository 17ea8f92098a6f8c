//! # dcc-config
//!
//! Configuration for the dcc runtime interception layer.
//!
//! The layer is configured once, when it is built. The build script of
//! `dcc-intercept-layer` resolves a [`LayerConfig`] from:
//! 1. built-in defaults
//! 2. the TOML file named by `DCC_LAYER_CONFIG`
//! 3. `DCC_LAYER_*` environment variables (highest priority)
//!
//! and bakes the result into the library, where it is parsed once at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

pub mod testing;

/// Names of the build-time environment variables read by [`LayerConfig::resolve`].
pub mod env {
    pub const CONFIG_FILE: &str = "DCC_LAYER_CONFIG";
    pub const SANITIZER: &str = "DCC_LAYER_SANITIZER";
    pub const TOOL_PATH: &str = "DCC_LAYER_TOOL_PATH";
    pub const LEAK_CHECK: &str = "DCC_LAYER_LEAK_CHECK";
    pub const STACK_USE_AFTER_RETURN: &str = "DCC_LAYER_STACK_USE_AFTER_RETURN";
    pub const ARCHIVE: &str = "DCC_LAYER_ARCHIVE";
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("unknown sanitizer: {0}")]
    UnknownSanitizer(String),
}

/// Which error detector the program was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sanitizer {
    /// In-process AddressSanitizer (with UndefinedBehaviorSanitizer)
    #[default]
    Address,
    /// In-process MemorySanitizer
    Memory,
    /// Out-of-process dynamic instrumentation under Valgrind
    Valgrind,
}

impl Sanitizer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sanitizer::Address => "address",
            Sanitizer::Memory => "memory",
            Sanitizer::Valgrind => "valgrind",
        }
    }

    /// True when errors are detected by a separate instrumentation process
    /// rather than by code compiled into the program.
    pub fn is_dynamic_instrumentation(&self) -> bool {
        matches!(self, Sanitizer::Valgrind)
    }
}

impl FromStr for Sanitizer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "address" | "asan" => Ok(Sanitizer::Address),
            "memory" | "msan" => Ok(Sanitizer::Memory),
            "valgrind" => Ok(Sanitizer::Valgrind),
            other => Err(ConfigError::UnknownSanitizer(other.to_string())),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub sanitizer: Sanitizer,
    /// Report leaks at exit (sanitizers) or run Valgrind with `--leak-check=yes`
    pub leak_check: bool,
    /// Rely on the sanitizer's own use-after-return detection. Disables stack poisoning.
    pub stack_use_after_return: bool,
    pub tool: ToolConfig,
    pub valgrind: ValgrindConfig,
    pub dispatch: DispatchConfig,
    pub poison: PoisonConfig,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            sanitizer: Sanitizer::default(),
            leak_check: false,
            stack_use_after_return: false,
            tool: ToolConfig::default(),
            valgrind: ValgrindConfig::default(),
            dispatch: DispatchConfig::default(),
            poison: PoisonConfig::default(),
        }
    }
}

impl LayerConfig {
    /// Resolve the build-time configuration: defaults, then the file named by
    /// `DCC_LAYER_CONFIG`, then `DCC_LAYER_*` overrides.
    pub fn resolve() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(env::CONFIG_FILE) {
            Some(path) => Self::load(Path::new(&path))?,
            None => LayerConfig::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading layer config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `DCC_LAYER_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(env::SANITIZER) {
            match value.parse() {
                Ok(sanitizer) => self.sanitizer = sanitizer,
                Err(e) => warn!("Ignoring {}: {}", env::SANITIZER, e),
            }
        }
        if let Some(path) = lookup(env::TOOL_PATH) {
            match &mut self.tool {
                ToolConfig::Path { path: p } => *p = PathBuf::from(path),
                ToolConfig::Embedded(tool) => tool.install_path = PathBuf::from(path),
            }
        }
        if let Some(value) = lookup(env::LEAK_CHECK) {
            self.leak_check = parse_flag(env::LEAK_CHECK, &value).unwrap_or(self.leak_check);
        }
        if let Some(value) = lookup(env::STACK_USE_AFTER_RETURN) {
            self.stack_use_after_return = parse_flag(env::STACK_USE_AFTER_RETURN, &value)
                .unwrap_or(self.stack_use_after_return);
        }
    }

    /// Poisoning the stack conflicts with the sanitizer's use-after-return
    /// detection, so only one of them is ever active.
    pub fn poison_enabled(&self) -> bool {
        !self.stack_use_after_return
    }

    /// Value published as `DCC_PATH`: where dcc is installed, in both tool modes.
    pub fn tool_path_value(&self) -> String {
        let path = match &self.tool {
            ToolConfig::Path { path } => path,
            ToolConfig::Embedded(tool) => &tool.install_path,
        };
        path.to_string_lossy().into_owned()
    }

    /// Options returned from `__asan_default_options`.
    pub fn asan_options(&self) -> String {
        format!(
            "verbosity=0:print_stacktrace=1:halt_on_error=1:detect_leaks={}:max_malloc_fill_size=4096000:quarantine_size_mb=16:verify_asan_link_order=0:detect_stack_use_after_return={}",
            flag_digit(self.leak_check),
            flag_digit(self.stack_use_after_return),
        )
    }

    /// Options returned from `__msan_default_options`.
    pub fn msan_options(&self) -> String {
        format!(
            "verbosity=0:print_stacktrace=1:halt_on_error=1:detect_leaks={}",
            flag_digit(self.leak_check)
        )
    }

    /// Options returned from `__ubsan_default_options`.
    pub fn ubsan_options(&self) -> String {
        self.msan_options()
    }

    /// Full Valgrind command line prefix: the binary followed by its fixed
    /// option set, in the order Valgrind receives them.
    pub fn valgrind_command(&self, log_fd: i32) -> Vec<String> {
        let vg = &self.valgrind;
        vec![
            vg.binary.to_string_lossy().into_owned(),
            format!("--log-fd={}", log_fd),
            "-q".to_string(),
            "--vgdb=yes".to_string(),
            format!("--leak-check={}", if self.leak_check { "yes" } else { "no" }),
            format!("--suppressions={}", vg.suppressions.display()),
            format!("--max-stackframe={}", vg.max_stackframe),
            "--partial-loads-ok=no".to_string(),
            format!("--malloc-fill={:#x}", vg.fill_byte),
            format!("--free-fill={:#x}", vg.fill_byte),
            "--vgdb-error=1".to_string(),
        ]
    }
}

fn flag_digit(on: bool) -> u8 {
    u8::from(on)
}

fn parse_flag(key: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        other => {
            warn!("Ignoring {}: not a boolean: {:?}", key, other);
            None
        }
    }
}

/// Where dcc is installed unless configured otherwise.
pub const DEFAULT_TOOL_PATH: &str = "/usr/local/bin/dcc";

/// How the external diagnostic tool is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolConfig {
    /// Executable on the filesystem, run through `/bin/sh -c`
    Path { path: PathBuf },
    /// xz tar archive baked into the library, unpacked by an interpreter
    Embedded(EmbeddedTool),
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig::Path {
            path: PathBuf::from(DEFAULT_TOOL_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedTool {
    pub interpreter: String,
    /// Script run after a fault, relative to the unpacked archive root
    pub driver_script: String,
    /// Script that reads Valgrind's error stream
    pub watcher_script: String,
    /// dcc installation the archive was taken from; still published as `DCC_PATH`
    pub install_path: PathBuf,
}

impl Default for EmbeddedTool {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            driver_script: "start_gdb.py".to_string(),
            watcher_script: "watch_valgrind.py".to_string(),
            install_path: PathBuf::from(DEFAULT_TOOL_PATH),
        }
    }
}

/// Valgrind relaunch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValgrindConfig {
    pub binary: PathBuf,
    pub suppressions: PathBuf,
    pub max_stackframe: u64,
    /// Byte written into fresh and freed heap blocks
    pub fill_byte: u8,
}

impl Default for ValgrindConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/bin/valgrind"),
            suppressions: PathBuf::from("/dev/null"),
            max_stackframe: 16_000_000,
            fill_byte: 0xbe,
        }
    }
}

/// Explain-error dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// First descriptor closed before launching the tool
    pub close_fds_from: i32,
    /// One past the last descriptor closed
    pub close_fds_to: i32,
    /// Let any process ptrace this one (Linux Yama). Process-wide.
    pub allow_any_ptracer: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            close_fds_from: 4,
            close_fds_to: 32,
            allow_any_ptracer: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoisonConfig {
    pub byte: u8,
}

impl Default for PoisonConfig {
    fn default() -> Self {
        Self { byte: 0xbe }
    }
}
