use crate::errors::{Result, SandboxError};
use crate::stager;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker prefix identifying a binary payload in the transport file map.
/// The remainder of the value is standard base64 of the raw bytes.
pub const BINARY_MARKER: &str = "__BINARY__";

/// Whether a payload holds text or base64-carried raw bytes.
/// Fixed at ingestion and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Text,
    Binary,
}

/// An in-memory named file supplied alongside a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualFile {
    pub name: String,
    pub kind: FileKind,
    /// Text: unicode content. Binary: base64 of the raw bytes.
    pub payload: String,
}

impl VirtualFile {
    /// Text file from content that is already unicode.
    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        let name = name.into();
        stager::validate_file_name(&name)?;
        Ok(Self {
            name,
            kind: FileKind::Text,
            payload: content.into(),
        })
    }

    /// Text file from raw bytes of unknown encoding. The bytes pass through
    /// the decode fallback chain documented on [`stager::decode_text`].
    pub fn text_from_bytes(name: impl Into<String>, raw: &[u8]) -> Result<Self> {
        let name = name.into();
        stager::validate_file_name(&name)?;
        let (content, _encoding) = stager::decode_text(raw);
        Ok(Self {
            name,
            kind: FileKind::Text,
            payload: content.into_owned(),
        })
    }

    /// Binary file from raw bytes.
    pub fn binary(name: impl Into<String>, raw: &[u8]) -> Result<Self> {
        let name = name.into();
        stager::validate_file_name(&name)?;
        Ok(Self {
            name,
            kind: FileKind::Binary,
            payload: BASE64.encode(raw),
        })
    }

    /// Ingest a value in the legacy transport form: a `__BINARY__` marker
    /// followed by base64 means binary, anything else is text.
    pub fn from_transport(name: impl Into<String>, value: &str) -> Result<Self> {
        match value.strip_prefix(BINARY_MARKER) {
            Some(encoded) => {
                let name = name.into();
                stager::validate_file_name(&name)?;
                Ok(Self {
                    name,
                    kind: FileKind::Binary,
                    payload: encoded.to_string(),
                })
            }
            None => Self::text(name, value),
        }
    }

    /// Render the payload back into its transport form.
    pub fn to_transport(&self) -> String {
        match self.kind {
            FileKind::Text => self.payload.clone(),
            FileKind::Binary => format!("{BINARY_MARKER}{}", self.payload),
        }
    }

    /// The bytes this file stages to disk. Binary payloads are base64-decoded;
    /// text payloads are re-encoded as UTF-8.
    pub fn staged_bytes(&self) -> Result<Vec<u8>> {
        match self.kind {
            FileKind::Text => Ok(self.payload.as_bytes().to_vec()),
            FileKind::Binary => BASE64
                .decode(self.payload.as_bytes())
                .map_err(|source| SandboxError::Transport {
                    name: self.name.clone(),
                    source,
                }),
        }
    }
}

/// One script execution: source text plus the named files it may read.
/// Consumed exactly once by [`crate::Sandbox::execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub script: String,
    pub files: BTreeMap<String, VirtualFile>,
}

impl ExecutionRequest {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            files: BTreeMap::new(),
        }
    }

    /// Add a file to the request. A later file with the same name replaces
    /// the earlier one; names are unique within a request.
    pub fn with_file(mut self, file: VirtualFile) -> Self {
        self.files.insert(file.name.clone(), file);
        self
    }

    /// Ingest a whole transport map (name -> transport value).
    pub fn with_transport_files<'a, I>(mut self, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in entries {
            let file = VirtualFile::from_transport(name, value)?;
            self.files.insert(file.name.clone(), file);
        }
        Ok(self)
    }

    /// Names of the supplied input files, used by the artifact collector to
    /// tell staged inputs apart from newly generated outputs.
    pub fn input_names(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}
