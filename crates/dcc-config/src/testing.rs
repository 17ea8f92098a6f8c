//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary working directory
//! - A fake diagnostic tool that records the environment it was launched with
//! - A `LayerConfig` pointing at that tool
//!
//! # Usage
//!
//! ```ignore
//! use dcc_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let config = env.layer_config();
//! // ... run a fault path with `config` ...
//! let seen = env.recorded_env()?;
//! ```

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{LayerConfig, ToolConfig};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with a recording diagnostic tool
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    pub root: PathBuf,
    /// Executable shell script standing in for the diagnostic tool
    pub tool_path: PathBuf,
    /// File the fake tool writes `env` output to
    pub env_dump: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();

        let env_dump = root.join(format!("tool-env-{}.txt", test_id));
        let tool_path = root.join("fake-dcc");
        let script = format!("#!/bin/sh\nenv > '{}'\n", env_dump.display());
        std::fs::write(&tool_path, script)?;
        std::fs::set_permissions(&tool_path, std::fs::Permissions::from_mode(0o755))?;

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            tool_path,
            env_dump,
            test_id,
        })
    }

    /// Layer config that launches the recording tool by path.
    pub fn layer_config(&self) -> LayerConfig {
        LayerConfig {
            tool: ToolConfig::Path {
                path: self.tool_path.clone(),
            },
            ..LayerConfig::default()
        }
    }

    /// True once the fake tool has run.
    pub fn tool_ran(&self) -> bool {
        self.env_dump.exists()
    }

    /// Environment the fake tool saw, parsed from its dump.
    pub fn recorded_env(&self) -> anyhow::Result<HashMap<String, String>> {
        let contents = std::fs::read_to_string(&self.env_dump)?;
        Ok(contents
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    /// Write a layer config file into the environment and return its path.
    pub fn write_config(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.root.join("layer.toml");
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
