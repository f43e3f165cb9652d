//! JSON-lines execution worker.
//!
//! Reads one request per line on stdin, writes one response per line on
//! stdout. Intended for embedding the sandbox into a host process over a
//! pipe; script storage, rendering and download delivery stay on the host
//! side.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use scriptbox::{ExecutionOptions, ExecutionRequest, Sandbox, SandboxConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Deserialize)]
struct WorkerRequest {
    script: String,
    /// name -> transport value (`__BINARY__` + base64 marks binary).
    #[serde(default)]
    files: BTreeMap<String, String>,
    timeout_secs: Option<u64>,
    /// When true, bundle the artifacts and return the ZIP inline as base64.
    #[serde(default)]
    archive: bool,
}

#[derive(Debug, Serialize)]
struct WorkerResponse {
    stdout: String,
    stderr: String,
    exit_code: i32,
    timed_out: bool,
    artifacts: Vec<ArtifactEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive_b64: Option<String>,
}

#[derive(Debug, Serialize)]
struct ArtifactEntry {
    name: String,
    kind: scriptbox::ArtifactKind,
}

impl WorkerResponse {
    fn error(message: String) -> Self {
        Self {
            stdout: String::new(),
            stderr: message,
            exit_code: 1,
            timed_out: false,
            artifacts: Vec::new(),
            archive_b64: None,
        }
    }
}

async fn handle(sandbox: &Sandbox, request: WorkerRequest) -> WorkerResponse {
    let WorkerRequest {
        script,
        files,
        timeout_secs,
        archive,
    } = request;
    let exec = match ExecutionRequest::new(script)
        .with_transport_files(files.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    {
        Ok(exec) => exec,
        Err(e) => return WorkerResponse::error(format!("Error running script: {e}")),
    };

    let mut options = ExecutionOptions::default();
    if let Some(secs) = timeout_secs {
        options.timeout = Duration::from_secs(secs);
    }

    let result = sandbox.execute_with_options(exec, &options).await;
    let archive_b64 = if archive && !result.artifacts.is_empty() {
        match result.archive() {
            Ok(bytes) => Some(BASE64.encode(bytes)),
            Err(e) => {
                tracing::warn!("archive build failed: {e}");
                None
            }
        }
    } else {
        None
    };

    WorkerResponse {
        stdout: result.stdout.clone(),
        stderr: result.stderr.clone(),
        exit_code: result.exit_code,
        timed_out: result.timed_out(),
        artifacts: result
            .artifacts
            .iter()
            .map(|a| ArtifactEntry {
                name: a.file_name().to_string(),
                kind: a.kind,
            })
            .collect(),
        archive_b64,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "scriptbox=info".to_string()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = SandboxConfig::default();
    if let Ok(path) = std::env::var("SCRIPTBOX_PYTHON") {
        config.interpreter = Some(PathBuf::from(path));
    }
    if let Ok(base) = std::env::var("SCRIPTBOX_WORKSPACE_BASE") {
        config.workspace_base = PathBuf::from(base);
    }
    let sandbox = Sandbox::with_config(config)?;
    tracing::info!("scriptbox-worker ready");

    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<WorkerRequest>(line) {
            Ok(request) => handle(&sandbox, request).await,
            Err(e) => {
                tracing::warn!("invalid request line: {e}");
                WorkerResponse::error(format!("Invalid request: {e}"))
            }
        };
        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        stdout.write_all(&payload).await?;
        stdout.flush().await?;
    }

    Ok(())
}
