//! Sandboxed Python script execution.
//!
//! Given a script's source text and an in-memory set of named input files,
//! [`Sandbox::execute`] stages the files into an isolated, disposable
//! working directory, prepends a preamble that redirects plotting and
//! tabular-export side effects onto disk, runs the combined script as an
//! independent process under a hard timeout, collects the generated
//! artifacts, and destroys the directory afterwards regardless of outcome.
//!
//! ```rust,no_run
//! use scriptbox::{ExecutionRequest, Sandbox, VirtualFile};
//!
//! # #[tokio::main]
//! # async fn main() -> scriptbox::Result<()> {
//! let sandbox = Sandbox::new()?;
//! let request = ExecutionRequest::new("print(open('data.csv').read())")
//!     .with_file(VirtualFile::text("data.csv", "x,y\n1,2\n")?);
//!
//! let result = sandbox.execute(request).await;
//! assert_eq!(result.exit_code, 0);
//! for artifact in &result.artifacts {
//!     println!("{:?}: {}", artifact.kind, artifact.path.display());
//! }
//! let zip_bytes = result.archive()?;
//! # Ok(())
//! # }
//! ```

mod archive;
mod artifacts;
mod config;
mod engine;
mod errors;
mod executor;
mod files;
mod preamble;
mod stager;
mod workspace;

pub use archive::ArchiveBuilder;
pub use artifacts::{Artifact, ArtifactCollector, ArtifactKind};
pub use config::{ExecutionOptions, SandboxConfig};
pub use engine::{ExecutionEngine, ProcessOutput};
pub use errors::{Result, SandboxError, TIMEOUT_PREFIX};
pub use executor::ProcessExecutor;
pub use files::{ExecutionRequest, FileKind, VirtualFile, BINARY_MARKER};
pub use preamble::{PreambleBuilder, PythonAdapter, RuntimeAdapter, RuntimePatchInjector, Snippet};
pub use stager::{decode_text, validate_file_name, FileStager};
pub use workspace::Workspace;

use std::path::Path;
use tracing::{info, warn};

/// Outcome of one execution: captured output, exit status, the artifacts
/// discovered in the working directory, and the directory handle itself.
/// Artifact paths stay valid until the result is dropped or
/// [`ExecutionResult::cleanup`] is called.
#[derive(Debug)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub artifacts: Vec<Artifact>,
    workspace: Option<Workspace>,
}

impl ExecutionResult {
    fn new(output: ProcessOutput, artifacts: Vec<Artifact>, workspace: Option<Workspace>) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            artifacts,
            workspace,
        }
    }

    fn aborted(message: String, workspace: Option<Workspace>) -> Self {
        warn!("execution aborted: {message}");
        Self::new(ProcessOutput::failure(message), Vec::new(), workspace)
    }

    /// The isolated working directory, while it still exists.
    pub fn workdir(&self) -> Option<&Path> {
        self.workspace.as_ref().map(|w| w.path())
    }

    /// Whether the run was forcibly terminated by the wall-clock timeout.
    pub fn timed_out(&self) -> bool {
        self.exit_code != 0 && self.stderr.starts_with(TIMEOUT_PREFIX)
    }

    /// Bundle all collected artifacts into one ZIP stream.
    pub fn archive(&self) -> Result<Vec<u8>> {
        let paths: Vec<_> = self.artifacts.iter().map(|a| a.path.clone()).collect();
        ArchiveBuilder::build(&paths)
    }

    /// Destroy the working directory now instead of at drop time.
    pub fn cleanup(mut self) {
        if let Some(workspace) = self.workspace.take() {
            workspace.cleanup();
        }
    }
}

/// Orchestrates one execution end to end: allocate workspace, stage files,
/// compose the combined script, run it, scan for artifacts. Holds no
/// cross-call mutable state; each request is consumed exactly once and gets
/// its own working directory, so concurrent executions need no locking.
pub struct Sandbox {
    engine: Box<dyn ExecutionEngine>,
    injector: RuntimePatchInjector<PythonAdapter>,
    config: SandboxConfig,
}

impl Sandbox {
    /// Sandbox with a discovered `python3` interpreter and default config.
    pub fn new() -> Result<Self> {
        Self::with_config(SandboxConfig::default())
    }

    pub fn with_config(config: SandboxConfig) -> Result<Self> {
        let executor = match &config.interpreter {
            Some(path) => ProcessExecutor::with_interpreter(path.clone())?,
            None => ProcessExecutor::new()?,
        };
        Ok(Self {
            engine: Box::new(executor),
            injector: RuntimePatchInjector::default(),
            config,
        })
    }

    /// Swap in a custom engine, keeping the rest of the pipeline. Used by
    /// tests to exercise orchestration without an interpreter.
    pub fn with_engine(engine: Box<dyn ExecutionEngine>, config: SandboxConfig) -> Self {
        Self {
            engine,
            injector: RuntimePatchInjector::default(),
            config,
        }
    }

    /// Execute a request with the configured default options.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let options = self.config.options.clone();
        self.execute_with_options(request, &options).await
    }

    /// Execute a request. The call resolves only once the child has exited
    /// or the timeout fired; every failure path is normalized into the
    /// result shape rather than propagated.
    pub async fn execute_with_options(
        &self,
        request: ExecutionRequest,
        options: &ExecutionOptions,
    ) -> ExecutionResult {
        let workspace = match Workspace::allocate(&self.config.workspace_base) {
            Ok(ws) => ws,
            Err(e) => {
                return ExecutionResult::aborted(format!("Error running script: {e}"), None)
            }
        };

        if let Err(e) = FileStager::stage(&request.files, workspace.path()) {
            return ExecutionResult::aborted(
                format!("Error running script: {e}"),
                Some(workspace),
            );
        }

        let combined = match self
            .injector
            .compose(&request.script, &request.files, workspace.path())
        {
            Ok(c) => c,
            Err(e) => {
                return ExecutionResult::aborted(
                    format!("Error running script: {e}"),
                    Some(workspace),
                )
            }
        };

        info!("running script in {}", workspace.path().display());
        let output = self.engine.run(&combined, workspace.path(), options).await;

        let collector = ArtifactCollector::new(request.input_names(), options.scan_depth);
        let artifacts = collector.scan(workspace.path());
        ExecutionResult::new(output, artifacts, Some(workspace))
    }
}
