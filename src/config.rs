use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Options applied to a single script execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Wall clock timeout for the child process.
    pub timeout: Duration,
    /// How deep the artifact scan descends into the working directory.
    /// 1 = top level only, 2 = top level plus first-level subdirectories.
    pub scan_depth: usize,
    /// Extra environment variables for the child process.
    pub env_vars: HashMap<String, String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            scan_depth: 2,
            env_vars: HashMap::new(),
        }
    }
}

impl ExecutionOptions {
    /// Convenience for the common case of only adjusting the timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Configuration for constructing a [`crate::Sandbox`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Explicit interpreter path. `None` means discover `python3`/`python`
    /// on PATH.
    pub interpreter: Option<PathBuf>,
    /// Base directory under which per-run working directories are created.
    pub workspace_base: PathBuf,
    /// Default execution options.
    pub options: ExecutionOptions,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            workspace_base: std::env::temp_dir().join("scriptbox-workspaces"),
            options: ExecutionOptions::default(),
        }
    }
}
