use crate::errors::Result;
use std::fs;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use tracing::debug;
use zip::write::FileOptions;

/// Bundles selected artifacts into one compressed byte stream.
pub struct ArchiveBuilder;

impl ArchiveBuilder {
    /// Build a deflate ZIP holding the given paths, each stored flat under
    /// its base name, in input order. Paths missing at build time are
    /// silently skipped. Duplicate base names are not de-duplicated here;
    /// callers must ensure uniqueness.
    pub fn build(paths: &[PathBuf]) -> Result<Vec<u8>> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let opts = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for path in paths {
            if !path.exists() {
                debug!("archive skipping missing path {}", path.display());
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            zip.start_file(name, opts)?;
            let data = fs::read(path)?;
            zip.write_all(&data)?;
        }

        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }
}
