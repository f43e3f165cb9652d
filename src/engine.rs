use crate::config::ExecutionOptions;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Captured outcome of one child process run. Every failure mode is
/// normalized into this shape; nothing escapes the engine boundary as an
/// unhandled fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: 1,
        }
    }

    /// Whether this run was forcibly terminated by the wall-clock timeout.
    pub fn timed_out(&self) -> bool {
        self.exit_code != 0 && self.stderr.starts_with(crate::errors::TIMEOUT_PREFIX)
    }
}

/// Trait for engines that run a combined script rooted at a working
/// directory. One production implementation exists
/// ([`crate::executor::ProcessExecutor`]); tests drive the orchestrator
/// through stub engines.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn run(&self, script: &str, workdir: &Path, options: &ExecutionOptions)
        -> ProcessOutput;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SandboxError;

    #[test]
    fn timed_out_matches_only_the_sentinel() {
        let timeout = ProcessOutput::failure(SandboxError::Timeout(60).to_string());
        assert!(timeout.timed_out());

        let crash = ProcessOutput::failure("Traceback (most recent call last): ...");
        assert!(!crash.timed_out());

        let ok = ProcessOutput {
            stdout: "done".into(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(!ok.timed_out());
    }
}
