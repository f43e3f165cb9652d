use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Python not installed or not found in PATH")]
    PythonNotFound,

    #[error("Invalid file name '{0}': must not contain path separators or traversal components")]
    InvalidFileName(String),

    #[error("Binary payload for '{name}' is not valid base64: {source}")]
    Transport {
        name: String,
        source: base64::DecodeError,
    },

    #[error("Malformed preamble snippet '{0}'")]
    MalformedSnippet(&'static str),

    #[error("Failed to spawn script process: {0}")]
    Spawn(String),

    // Rendered text is the timeout sentinel; callers match on TIMEOUT_PREFIX.
    #[error("Script execution timeout ({0} seconds)")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable prefix of the timeout sentinel reported in stderr when a run is
/// forcibly terminated. Callers can match on this to distinguish a timeout
/// from an ordinary script failure.
pub const TIMEOUT_PREFIX: &str = "Script execution timeout";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_limit_and_keeps_the_prefix() {
        let msg = SandboxError::Timeout(2).to_string();
        assert!(msg.starts_with(TIMEOUT_PREFIX));
        assert!(msg.contains('2'));
        assert_eq!(msg, "Script execution timeout (2 seconds)");
    }
}
