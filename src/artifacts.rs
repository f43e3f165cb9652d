use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Classification of a file discovered in the working directory after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Plot,
    Tabular,
    Other,
}

/// A file discovered post-execution. The path is valid only until the
/// workspace is cleaned up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .map(|n| n.to_str().unwrap_or_default())
            .unwrap_or_default()
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "svg", "gif", "bmp"];
const TABULAR_EXTENSIONS: &[&str] = &["csv", "tsv"];
const PLOT_NAME_PREFIXES: &[&str] = &["plot_", "radar_chart_"];

/// Scans the working directory after execution and classifies what the
/// script produced.
pub struct ArtifactCollector {
    input_names: HashSet<String>,
    depth: usize,
}

impl ArtifactCollector {
    /// `input_names` are the staged input files, used to exclude them from
    /// "newly generated" tabular output. `depth` bounds the scan: 1 = top
    /// level only, 2 = plus first-level subdirectories.
    pub fn new<I, S>(input_names: I, depth: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input_names: input_names.into_iter().map(Into::into).collect(),
            depth: depth.max(1),
        }
    }

    /// Classify one path by extension and name pattern.
    pub fn classify(path: &Path) -> ArtifactKind {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();

        if IMAGE_EXTENSIONS.contains(&extension.as_str())
            && PLOT_NAME_PREFIXES.iter().any(|p| stem.starts_with(p))
        {
            ArtifactKind::Plot
        } else if TABULAR_EXTENSIONS.contains(&extension.as_str()) {
            ArtifactKind::Tabular
        } else {
            ArtifactKind::Other
        }
    }

    /// Walk `dir` down to the configured depth and return the classified
    /// artifacts, sorted by path. Tabular files carrying an input file's
    /// name are excluded; everything else is reported.
    pub fn scan(&self, dir: &Path) -> Vec<Artifact> {
        let mut artifacts = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(self.depth)
            .into_iter()
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("artifact scan skipped an entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path().to_path_buf();
            let kind = Self::classify(&path);
            if kind == ArtifactKind::Tabular {
                let name = entry.file_name().to_string_lossy();
                if self.input_names.contains(name.as_ref()) {
                    continue;
                }
            }
            artifacts.push(Artifact { path, kind });
        }
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        artifacts
    }
}
