use crate::errors::{Result, SandboxError};
use crate::files::VirtualFile;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Reject names that could write outside the staging directory: path
/// separators, traversal components, NUL, empty or dot-only names.
pub fn validate_file_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(SandboxError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Decode text bytes through the fixed fallback chain:
///
/// 1. UTF-8, strict;
/// 2. TIS-620, strict (ASCII plus the assigned Thai range 0xA1-0xDA, 0xDF-0xFB);
/// 3. windows-874 (cp874), rejecting unmappable bytes;
/// 4. UTF-8 lossy, last resort.
///
/// Pure TIS-620 is tried before its windows-874 superset so the stricter
/// encoding wins when both match. Returns the decoded text and the label of
/// the stage that succeeded.
pub fn decode_text(raw: &[u8]) -> (Cow<'_, str>, &'static str) {
    if let Ok(text) = std::str::from_utf8(raw) {
        return (Cow::Borrowed(text), "utf-8");
    }
    if is_strict_tis620(raw) {
        let (text, _, _) = encoding_rs::WINDOWS_874.decode(raw);
        return (text, "tis-620");
    }
    let (text, had_errors) = encoding_rs::WINDOWS_874.decode_without_bom_handling(raw);
    if !had_errors {
        return (text, "windows-874");
    }
    (String::from_utf8_lossy(raw), "utf-8-lossy")
}

// TIS-620 assigns ASCII plus 0xA1-0xDA and 0xDF-0xFB; the 0x80-0xA0 block
// and the 0xDB-0xDE / 0xFC-0xFF gaps are unassigned.
fn is_strict_tis620(raw: &[u8]) -> bool {
    raw.iter()
        .all(|&b| b < 0x80 || matches!(b, 0xA1..=0xDA | 0xDF..=0xFB))
}

/// Materializes an in-memory file map onto disk before execution.
pub struct FileStager;

impl FileStager {
    /// Write every file into `dir`. Text payloads are written as UTF-8,
    /// binary payloads are base64-decoded to raw bytes. Fails fast on the
    /// first invalid name, bad transport payload or write error; partially
    /// written files are left for directory-level cleanup.
    pub fn stage(files: &BTreeMap<String, VirtualFile>, dir: &Path) -> Result<()> {
        for file in files.values() {
            validate_file_name(&file.name)?;
            let bytes = file.staged_bytes()?;
            let path = dir.join(&file.name);
            fs::write(&path, &bytes)?;
            debug!("staged {} ({} bytes)", path.display(), bytes.len());
        }
        Ok(())
    }
}
