//! Build script for dcc-intercept-layer
//!
//! Resolves the layer configuration and bakes it into the library:
//! - `layer.toml`: the resolved `LayerConfig`, parsed once at startup
//! - `sanitizer_options.rs`: option strings returned from the sanitizer hooks
//! - `payload.bin`: the embedded diagnostic tool archive (empty when unused)

use dcc_config::{env, LayerConfig, ToolConfig};
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for var in [
        env::CONFIG_FILE,
        env::SANITIZER,
        env::TOOL_PATH,
        env::LEAK_CHECK,
        env::STACK_USE_AFTER_RETURN,
        env::ARCHIVE,
    ] {
        println!("cargo:rerun-if-env-changed={}", var);
    }
    if let Ok(path) = std::env::var(env::CONFIG_FILE) {
        println!("cargo:rerun-if-changed={}", path);
    }

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    let config = LayerConfig::resolve()
        .unwrap_or_else(|e| panic!("dcc-intercept-layer: cannot resolve layer config: {}", e));
    let toml = config
        .to_toml_string()
        .unwrap_or_else(|e| panic!("dcc-intercept-layer: cannot serialize layer config: {}", e));
    std::fs::write(out_dir.join("layer.toml"), toml).expect("write layer.toml");

    let options = format!(
        "pub static ASAN_DEFAULT_OPTIONS: &[u8] = b\"{}\\0\";\n\
         pub static MSAN_DEFAULT_OPTIONS: &[u8] = b\"{}\\0\";\n\
         pub static UBSAN_DEFAULT_OPTIONS: &[u8] = b\"{}\\0\";\n",
        config.asan_options(),
        config.msan_options(),
        config.ubsan_options(),
    );
    std::fs::write(out_dir.join("sanitizer_options.rs"), options)
        .expect("write sanitizer_options.rs");

    let payload_path = out_dir.join("payload.bin");
    match std::env::var(env::ARCHIVE) {
        Ok(archive) => {
            println!("cargo:rerun-if-changed={}", archive);
            std::fs::copy(&archive, &payload_path).unwrap_or_else(|e| {
                panic!("dcc-intercept-layer: cannot embed archive {}: {}", archive, e)
            });
        }
        Err(_) => {
            if matches!(config.tool, ToolConfig::Embedded(_)) {
                println!(
                    "cargo:warning=embedded diagnostic tool configured but {} is not set",
                    env::ARCHIVE
                );
            }
            std::fs::write(&payload_path, b"").expect("write payload.bin");
        }
    }
}
