//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated roomlog home directory
//! - A `Config` pointing at it
//! - Environment variables for spawning the `roomlog` binary
//!
//! # Usage
//!
//! ```ignore
//! use roomlog_config::testing::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config();
//!     // config.storage.home is a fresh temp dir
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with its own home directory
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// roomlog home for this test
    pub home: PathBuf,
    /// A project directory usable as a room key
    pub project_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let home = root.join("home");
        let project_root = root.join("project");
        std::fs::create_dir_all(&home)?;
        std::fs::create_dir_all(&project_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            home,
            project_root,
            test_id,
        })
    }

    /// Default config rooted at this environment's home
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.home = self.home.clone();
        cfg
    }

    /// Config with a specific retention setting (validated like a file value)
    pub fn config_with_max_messages(&self, max_messages: i64) -> Config {
        let mut cfg = self.config();
        cfg.retention.max_messages = max_messages;
        cfg
    }

    /// Room key derived from the project root
    pub fn room_key(&self) -> String {
        self.project_root.to_string_lossy().into_owned()
    }

    /// Number of persisted room files
    pub fn room_file_count(&self) -> usize {
        std::fs::read_dir(crate::path::rooms_dir(&self.home))
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| crate::path::is_room_file(&e.path()))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Environment variables for spawning `roomlog` against this home.
    pub fn cli_env(&self) -> Vec<(String, String)> {
        vec![
            (
                crate::ENV_HOME.to_string(),
                self.home.to_string_lossy().into_owned(),
            ),
            ("ROOMLOG_LOG".to_string(), "warn".to_string()),
        ]
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
