use crate::config::ExecutionOptions;
use crate::engine::{ExecutionEngine, ProcessOutput};
use crate::errors::{Result, SandboxError};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Name of the reserved file the combined script is written to inside the
/// working directory. Removed after the run on every path so it never
/// surfaces as an artifact.
const RUNNER_FILE: &str = "__scriptbox_main__.py";

/// Runs a combined script as an independent child process rooted at the
/// working directory, under a hard wall-clock timeout.
#[derive(Debug)]
pub struct ProcessExecutor {
    interpreter: PathBuf,
}

impl ProcessExecutor {
    /// Discover `python3` (or `python`) on PATH.
    pub fn new() -> Result<Self> {
        let interpreter = which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|_| SandboxError::PythonNotFound)?;
        Ok(Self { interpreter })
    }

    /// Use an explicit interpreter path (e.g. a bundled Python).
    pub fn with_interpreter(interpreter: PathBuf) -> Result<Self> {
        if !interpreter.exists() {
            return Err(SandboxError::PythonNotFound);
        }
        Ok(Self { interpreter })
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Run the combined script. All failure paths are normalized into
    /// [`ProcessOutput`]: spawn failures and internal errors become exit
    /// code 1 with a descriptive message, a timeout becomes exit code 1 with
    /// the timeout sentinel and empty stdout. The caller's working directory
    /// is never touched; the child gets its own.
    pub async fn run(
        &self,
        script: &str,
        workdir: &Path,
        options: &ExecutionOptions,
    ) -> ProcessOutput {
        let result = self.try_run(script, workdir, options).await;

        // Whatever happened, the runner file must not linger among artifacts.
        let script_path = workdir.join(RUNNER_FILE);
        if script_path.exists() {
            if let Err(e) = fs::remove_file(&script_path) {
                warn!("failed to remove runner file {}: {e}", script_path.display());
            }
        }

        match result {
            Ok(output) => output,
            Err(e @ SandboxError::Timeout(_)) => ProcessOutput::failure(e.to_string()),
            Err(e) => ProcessOutput::failure(format!("Error running script: {e}")),
        }
    }

    async fn try_run(
        &self,
        script: &str,
        workdir: &Path,
        options: &ExecutionOptions,
    ) -> Result<ProcessOutput> {
        let script_path = workdir.join(RUNNER_FILE);
        fs::write(&script_path, script)?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&script_path)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PYTHONIOENCODING", "utf-8")
            .kill_on_drop(true);
        for (key, value) in &options.env_vars {
            cmd.env(key, value);
        }

        // Own process group so a timeout kill reaches grandchildren too.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| SandboxError::Spawn(e.to_string()))?;
        let pid = child.id();
        debug!(
            "spawned {} (pid {:?}) in {}",
            self.interpreter.display(),
            pid,
            workdir.display()
        );

        match tokio::time::timeout(options.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ProcessOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(1),
            }),
            Ok(Err(e)) => Err(SandboxError::Io(e)),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                Err(SandboxError::Timeout(options.timeout.as_secs()))
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        warn!("failed to kill process group {pid}: {e}");
    }
}

// Elsewhere kill_on_drop reaps the direct child when the wait future is
// dropped by the timeout.
#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[async_trait]
impl ExecutionEngine for ProcessExecutor {
    async fn run(
        &self,
        script: &str,
        workdir: &Path,
        options: &ExecutionOptions,
    ) -> ProcessOutput {
        ProcessExecutor::run(self, script, workdir, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn executor() -> Option<ProcessExecutor> {
        match ProcessExecutor::new() {
            Ok(e) => Some(e),
            Err(_) => {
                eprintln!("skipping: no python interpreter on PATH");
                None
            }
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_zero_exit() {
        let Some(executor) = executor() else { return };
        let dir = tempfile::tempdir().unwrap();
        let out = executor
            .run(
                "print('hello from child')",
                dir.path(),
                &ExecutionOptions::default(),
            )
            .await;
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "hello from child");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn script_failure_passes_stderr_through() {
        let Some(executor) = executor() else { return };
        let dir = tempfile::tempdir().unwrap();
        let out = executor
            .run(
                "raise RuntimeError('boom')",
                dir.path(),
                &ExecutionOptions::default(),
            )
            .await;
        assert_ne!(out.exit_code, 0);
        assert!(out.stderr.contains("boom"));
        assert!(!out.timed_out());
    }

    #[tokio::test]
    async fn timeout_returns_sentinel_within_bounded_overhead() {
        let Some(executor) = executor() else { return };
        let dir = tempfile::tempdir().unwrap();
        let options = ExecutionOptions::with_timeout(Duration::from_secs(2));
        let started = Instant::now();
        let out = executor
            .run("import time\ntime.sleep(5)\nprint('late')", dir.path(), &options)
            .await;
        let elapsed = started.elapsed();

        assert_eq!(out.exit_code, 1);
        assert!(out.stdout.is_empty());
        assert!(out.timed_out());
        assert!(out.stderr.contains('2'), "stderr was: {}", out.stderr);
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn artifacts_flushed_before_timeout_survive() {
        let Some(executor) = executor() else { return };
        let dir = tempfile::tempdir().unwrap();
        let options = ExecutionOptions::with_timeout(Duration::from_secs(2));
        let script = "with open('early.txt', 'w') as f:\n    f.write('kept')\nimport time\ntime.sleep(5)";
        let out = executor.run(script, dir.path(), &options).await;
        assert!(out.timed_out());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("early.txt")).unwrap(),
            "kept"
        );
    }

    #[tokio::test]
    async fn runner_file_is_removed_after_the_run() {
        let Some(executor) = executor() else { return };
        let dir = tempfile::tempdir().unwrap();
        executor
            .run("print('x')", dir.path(), &ExecutionOptions::default())
            .await;
        assert!(!dir.path().join(RUNNER_FILE).exists());
    }

    #[tokio::test]
    async fn spawn_failure_is_normalized_not_propagated() {
        // A directory exists but cannot be executed.
        let dir = tempfile::tempdir().unwrap();
        let bogus = ProcessExecutor::with_interpreter(dir.path().to_path_buf()).unwrap();
        let workdir = tempfile::tempdir().unwrap();
        let out = bogus
            .run("print('x')", workdir.path(), &ExecutionOptions::default())
            .await;
        assert_eq!(out.exit_code, 1);
        assert!(out.stdout.is_empty());
        assert!(out.stderr.starts_with("Error running script:"));
    }

    #[test]
    fn missing_interpreter_is_reported_at_construction() {
        let err = ProcessExecutor::with_interpreter(PathBuf::from("/no/such/python")).unwrap_err();
        assert!(matches!(err, SandboxError::PythonNotFound));
    }
}
