//! Layer configuration baked in by `build.rs`, resolved once per process.

use dcc_config::LayerConfig;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set from `DCC_DEBUG` at startup; gates `dcc_debug!`.
pub static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

static CONFIG: OnceCell<LayerConfig> = OnceCell::new();

const BAKED_CONFIG: &str = include_str!(concat!(env!("OUT_DIR"), "/layer.toml"));

static PAYLOAD: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/payload.bin"));

// ASAN_DEFAULT_OPTIONS, MSAN_DEFAULT_OPTIONS, UBSAN_DEFAULT_OPTIONS: NUL-terminated,
// the sanitizer runtimes read them before any constructor has run.
include!(concat!(env!("OUT_DIR"), "/sanitizer_options.rs"));

/// The process-wide configuration. Parsed from the baked TOML on first use.
pub fn get() -> &'static LayerConfig {
    CONFIG.get_or_init(|| match LayerConfig::from_toml_str(BAKED_CONFIG) {
        Ok(config) => config,
        Err(e) => {
            dcc_warn!("baked layer config unreadable, using defaults: {}", e);
            LayerConfig::default()
        }
    })
}

/// Replace the baked configuration. Only effective before the first [`get`];
/// returns the rejected config otherwise.
pub fn install(config: LayerConfig) -> Result<(), LayerConfig> {
    CONFIG.set(config)
}

/// The embedded diagnostic tool archive; empty unless the build embedded one.
pub fn payload() -> &'static [u8] {
    PAYLOAD
}

pub(crate) unsafe fn init_logger() {
    let debug_ptr = libc::getenv(c"DCC_DEBUG".as_ptr());
    if !debug_ptr.is_null() {
        DEBUG_ENABLED.store(true, Ordering::Relaxed);
    }
}
