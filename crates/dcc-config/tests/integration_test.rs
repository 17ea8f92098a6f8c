//! Integration tests for dcc-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use dcc_config::testing::TestEnvironment;
use dcc_config::{LayerConfig, Sanitizer, ToolConfig};
use std::path::PathBuf;

/// Test config loading from a real config file
#[test]
fn test_load_config_from_file() {
    let env = TestEnvironment::new().unwrap();
    let path = env
        .write_config(
            r#"
sanitizer = "valgrind"
leak_check = true

[tool]
kind = "path"
path = "/opt/dcc/dcc"

[valgrind]
binary = "/usr/local/bin/valgrind"
suppressions = "/etc/dcc/valgrind.supp"

[dispatch]
allow_any_ptracer = false
"#,
        )
        .unwrap();

    let config = LayerConfig::load(&path).unwrap();

    assert_eq!(config.sanitizer, Sanitizer::Valgrind);
    assert!(config.leak_check);
    assert_eq!(
        config.tool,
        ToolConfig::Path {
            path: PathBuf::from("/opt/dcc/dcc")
        }
    );
    assert_eq!(
        config.valgrind.binary,
        PathBuf::from("/usr/local/bin/valgrind")
    );
    // Unspecified values keep their defaults
    assert_eq!(config.valgrind.max_stackframe, 16_000_000);
    assert!(!config.dispatch.allow_any_ptracer);
    assert_eq!(config.dispatch.close_fds_from, 4);

    let cmd = config.valgrind_command(9);
    assert_eq!(cmd[0], "/usr/local/bin/valgrind");
    assert!(cmd.contains(&"--leak-check=yes".to_string()));
    assert!(cmd.contains(&"--suppressions=/etc/dcc/valgrind.supp".to_string()));
}

/// Test that a missing file is reported, not defaulted
#[test]
fn test_missing_config_file_is_an_error() {
    let env = TestEnvironment::new().unwrap();
    let result = LayerConfig::load(&env.root.join("absent.toml"));
    assert!(matches!(result, Err(dcc_config::ConfigError::Io(_))));
}

/// Test that a malformed file is reported as a parse error
#[test]
fn test_malformed_config_file_is_an_error() {
    let env = TestEnvironment::new().unwrap();
    let path = env.write_config("sanitizer = [").unwrap();
    let result = LayerConfig::load(&path);
    assert!(matches!(result, Err(dcc_config::ConfigError::Toml(_))));
}

/// Test file values followed by overrides, the order `resolve()` applies them in
#[test]
fn test_file_then_overrides() {
    let env = TestEnvironment::new().unwrap();
    let path = env
        .write_config(
            r#"
sanitizer = "memory"

[tool]
kind = "embedded"
driver_script = "explain.py"
"#,
        )
        .unwrap();

    let mut config = LayerConfig::load(&path).unwrap();
    match &config.tool {
        ToolConfig::Embedded(tool) => {
            assert_eq!(tool.driver_script, "explain.py");
            assert_eq!(tool.interpreter, "python3");
        }
        other => panic!("expected embedded tool, got {:?}", other),
    }

    config.apply_overrides(|key| match key {
        dcc_config::env::SANITIZER => Some("address".to_string()),
        _ => None,
    });
    assert_eq!(config.sanitizer, Sanitizer::Address);
    assert!(matches!(config.tool, ToolConfig::Embedded(_)));
}

/// Test complete config serialization/deserialization cycle through a file
#[test]
fn test_config_full_roundtrip_with_all_sections() {
    let env = TestEnvironment::new().unwrap();
    let original = env.layer_config();

    let path = env
        .write_config(&original.to_toml_string().unwrap())
        .unwrap();
    let loaded = LayerConfig::load(&path).unwrap();

    assert_eq!(original, loaded);
}
