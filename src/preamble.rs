use crate::errors::{Result, SandboxError};
use crate::files::{FileKind, VirtualFile};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::BTreeMap;
use std::path::Path;

/// One self-contained fragment of generated preamble code. Variable data is
/// embedded base64-armored, never interpolated raw, so user-controlled
/// strings cannot break out of the generated source.
#[derive(Debug, Clone)]
pub struct Snippet {
    pub label: &'static str,
    pub code: String,
}

impl Snippet {
    pub fn new(label: &'static str, code: impl Into<String>) -> Self {
        Self {
            label,
            code: code.into(),
        }
    }

    /// Structural well-formedness check applied before concatenation:
    /// non-empty, NUL-free, balanced triple-quote markers, space-indented.
    pub fn validate(&self) -> Result<()> {
        let malformed = self.code.trim().is_empty()
            || self.code.contains('\0')
            || self.code.matches("'''").count() % 2 != 0
            || self.code.matches("\"\"\"").count() % 2 != 0
            || self.code.lines().any(|l| l.starts_with('\t'));
        if malformed {
            return Err(SandboxError::MalformedSnippet(self.label));
        }
        Ok(())
    }
}

/// Composes validated snippets into one preamble, in push order.
#[derive(Debug, Default)]
pub struct PreambleBuilder {
    snippets: Vec<Snippet>,
}

impl PreambleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snippet: Snippet) -> Result<&mut Self> {
        snippet.validate()?;
        self.snippets.push(snippet);
        Ok(self)
    }

    pub fn build(&self) -> String {
        let mut out = String::new();
        for snippet in &self.snippets {
            out.push_str(&format!("# --- {} ---\n", snippet.label));
            out.push_str(&snippet.code);
            if !snippet.code.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

/// Output-redirection capability for a scripting runtime. Each method yields
/// a self-contained snippet; the sandbox core stays agnostic to how
/// redirection is wired into the target ecosystem.
pub trait RuntimeAdapter {
    /// Point relative-path resolution at the isolated directory.
    fn enter_workdir(&self, dir: &Path) -> Snippet;

    /// Re-materialize the staged files from inside the child process, so the
    /// redirection context and the file set are guaranteed consistent.
    fn stage_files(&self, files: &BTreeMap<String, VirtualFile>, dir: &Path) -> Result<Snippet>;

    /// Divert the plotting display operation into numbered image files.
    fn redirect_plot_output(&self, dir: &Path) -> Snippet;

    /// Divert relative-path tabular exports into the isolated directory.
    fn redirect_tabular_output(&self, dir: &Path) -> Snippet;

    /// Repair runtime-specific legacy constructs in the user script source.
    fn normalize_script(&self, script: &str) -> String;
}

/// CPython implementation of [`RuntimeAdapter`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonAdapter;

fn armor(data: &[u8]) -> String {
    BASE64.encode(data)
}

fn armored_path(dir: &Path) -> String {
    armor(dir.to_string_lossy().as_bytes())
}

impl RuntimeAdapter for PythonAdapter {
    fn enter_workdir(&self, dir: &Path) -> Snippet {
        let code = format!(
            r#"import base64
import os
_scriptbox_dir = base64.b64decode("{dir}").decode("utf-8")
os.chdir(_scriptbox_dir)
"#,
            dir = armored_path(dir)
        );
        Snippet::new("enter workdir", code)
    }

    fn stage_files(&self, files: &BTreeMap<String, VirtualFile>, dir: &Path) -> Result<Snippet> {
        // name -> {kind, payload}; payload is base64 of the raw bytes for
        // both kinds so the manifest itself is pure JSON-over-base64.
        let mut manifest = serde_json::Map::new();
        for file in files.values() {
            let payload = match file.kind {
                FileKind::Text => armor(file.payload.as_bytes()),
                FileKind::Binary => file.payload.clone(),
            };
            let kind = match file.kind {
                FileKind::Text => "text",
                FileKind::Binary => "binary",
            };
            manifest.insert(
                file.name.clone(),
                serde_json::json!({ "kind": kind, "payload": payload }),
            );
        }
        let manifest_json = serde_json::to_string(&serde_json::Value::Object(manifest))?;

        // The decode chain below is the in-process spelling of
        // stager::decode_text: utf-8, tis-620, cp874, then lossy utf-8.
        let code = format!(
            r#"import base64
import json
import os
_scriptbox_stage_dir = base64.b64decode("{dir}").decode("utf-8")
_scriptbox_manifest = json.loads(base64.b64decode("{manifest}").decode("utf-8"))
for _scriptbox_name, _scriptbox_entry in _scriptbox_manifest.items():
    _scriptbox_raw = base64.b64decode(_scriptbox_entry["payload"])
    _scriptbox_path = os.path.join(_scriptbox_stage_dir, _scriptbox_name)
    if _scriptbox_entry["kind"] == "binary":
        with open(_scriptbox_path, "wb") as _scriptbox_out:
            _scriptbox_out.write(_scriptbox_raw)
    else:
        try:
            _scriptbox_text = _scriptbox_raw.decode("utf-8")
        except UnicodeDecodeError:
            try:
                _scriptbox_text = _scriptbox_raw.decode("tis-620")
            except (UnicodeDecodeError, LookupError):
                try:
                    _scriptbox_text = _scriptbox_raw.decode("cp874")
                except (UnicodeDecodeError, LookupError):
                    _scriptbox_text = _scriptbox_raw.decode("utf-8", errors="ignore")
        with open(_scriptbox_path, "w", encoding="utf-8") as _scriptbox_out:
            _scriptbox_out.write(_scriptbox_text)
"#,
            dir = armored_path(dir),
            manifest = armor(manifest_json.as_bytes())
        );
        Ok(Snippet::new("stage files", code))
    }

    fn redirect_plot_output(&self, dir: &Path) -> Snippet {
        let code = format!(
            r#"try:
    import matplotlib
    matplotlib.use("Agg")
    import matplotlib.pyplot as _scriptbox_plt
except ImportError:
    _scriptbox_plt = None
if _scriptbox_plt is not None:
    import base64
    import os
    _scriptbox_plot_dir = base64.b64decode("{dir}").decode("utf-8")
    _scriptbox_figure_counter = 0
    def _scriptbox_show(*_args, **_kwargs):
        global _scriptbox_figure_counter
        _scriptbox_figure_counter += 1
        _scriptbox_filename = "plot_{{}}.png".format(_scriptbox_figure_counter)
        _scriptbox_plt.savefig(
            os.path.join(_scriptbox_plot_dir, _scriptbox_filename),
            dpi=300,
            bbox_inches="tight",
        )
        print("Plot saved as: " + _scriptbox_filename)
        _scriptbox_plt.close()
    _scriptbox_plt.show = _scriptbox_show
"#,
            dir = armored_path(dir)
        );
        Snippet::new("redirect plot output", code)
    }

    fn redirect_tabular_output(&self, dir: &Path) -> Snippet {
        let code = format!(
            r#"try:
    import pandas as _scriptbox_pd
except ImportError:
    _scriptbox_pd = None
if _scriptbox_pd is not None:
    import base64
    import os
    _scriptbox_csv_dir = base64.b64decode("{dir}").decode("utf-8")
    _scriptbox_to_csv = _scriptbox_pd.DataFrame.to_csv
    def _scriptbox_redirected_to_csv(self, path_or_buf=None, **kwargs):
        if isinstance(path_or_buf, str) and not os.path.isabs(path_or_buf):
            path_or_buf = os.path.join(_scriptbox_csv_dir, path_or_buf)
        return _scriptbox_to_csv(self, path_or_buf, **kwargs)
    _scriptbox_pd.DataFrame.to_csv = _scriptbox_redirected_to_csv
"#,
            dir = armored_path(dir)
        );
        Snippet::new("redirect tabular output", code)
    }

    fn normalize_script(&self, script: &str) -> String {
        script.replace("encoding='tis-620'", "encoding='utf-8'")
    }
}

/// Builds a preamble that redirects plotting and export side effects into
/// the isolated directory, then prepends it to the user script. Applied
/// exactly once per execution; only I/O destinations change, never the
/// script's computational logic.
pub struct RuntimePatchInjector<A: RuntimeAdapter> {
    adapter: A,
}

impl<A: RuntimeAdapter> RuntimePatchInjector<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter }
    }

    pub fn compose(
        &self,
        script: &str,
        files: &BTreeMap<String, VirtualFile>,
        dir: &Path,
    ) -> Result<String> {
        let mut builder = PreambleBuilder::new();
        builder.push(self.adapter.enter_workdir(dir))?;
        builder.push(self.adapter.stage_files(files, dir)?)?;
        builder.push(self.adapter.redirect_plot_output(dir))?;
        builder.push(self.adapter.redirect_tabular_output(dir))?;

        let mut combined = builder.build();
        combined.push_str("# ===== user script =====\n");
        combined.push_str(&self.adapter.normalize_script(script));
        combined.push('\n');
        Ok(combined)
    }
}

impl Default for RuntimePatchInjector<PythonAdapter> {
    fn default() -> Self {
        Self::new(PythonAdapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn workdir() -> PathBuf {
        PathBuf::from("/tmp/scriptbox-test")
    }

    #[test]
    fn snippet_validation_rejects_malformed_fragments() {
        assert!(Snippet::new("empty", "   \n").validate().is_err());
        assert!(Snippet::new("nul", "x = \0").validate().is_err());
        assert!(Snippet::new("quotes", "s = '''open").validate().is_err());
        assert!(Snippet::new("tabs", "\tx = 1\n").validate().is_err());
        assert!(Snippet::new("ok", "x = 1\n").validate().is_ok());
    }

    #[test]
    fn builder_refuses_bad_snippets() {
        let mut builder = PreambleBuilder::new();
        assert!(builder.push(Snippet::new("bad", "")).is_err());
        assert!(builder.push(Snippet::new("good", "x = 1\n")).is_ok());
        assert!(builder.build().contains("# --- good ---"));
    }

    #[test]
    fn preamble_precedes_user_script_and_patches_both_sinks() {
        let injector = RuntimePatchInjector::default();
        let files = BTreeMap::new();
        let combined = injector
            .compose("print('hello')", &files, &workdir())
            .unwrap();

        let marker = combined.find("# ===== user script =====").unwrap();
        let show_patch = combined.find("_scriptbox_plt.show = _scriptbox_show").unwrap();
        let csv_patch = combined
            .find("_scriptbox_pd.DataFrame.to_csv = _scriptbox_redirected_to_csv")
            .unwrap();
        assert!(show_patch < marker);
        assert!(csv_patch < marker);
        assert!(combined.ends_with("print('hello')\n"));
        assert!(combined.contains("matplotlib.use(\"Agg\")"));
        assert!(combined.contains("plot_{}.png"));
    }

    #[test]
    fn user_payloads_are_armored_not_interpolated() {
        let injector = RuntimePatchInjector::default();
        let mut files = BTreeMap::new();
        let hostile = VirtualFile::text("x.txt", "''')\nimport os\nos.system('rm')#").unwrap();
        files.insert(hostile.name.clone(), hostile);
        let combined = injector.compose("pass", &files, &workdir()).unwrap();
        // The hostile content must only appear base64-armored.
        assert!(!combined.contains("os.system"));
    }

    #[test]
    fn legacy_encoding_references_are_normalized() {
        let adapter = PythonAdapter;
        let fixed = adapter.normalize_script("open('f.csv', encoding='tis-620')");
        assert_eq!(fixed, "open('f.csv', encoding='utf-8')");
    }

    #[test]
    fn manifest_carries_every_file_name() {
        let adapter = PythonAdapter;
        let mut files = BTreeMap::new();
        for file in [
            VirtualFile::text("one.txt", "1").unwrap(),
            VirtualFile::binary("two.bin", &[7, 8]).unwrap(),
        ] {
            files.insert(file.name.clone(), file);
        }
        let snippet = adapter.stage_files(&files, &workdir()).unwrap();
        snippet.validate().unwrap();
        // Manifest is embedded armored; decode it back to check.
        let armored = snippet
            .code
            .lines()
            .find(|l| l.contains("_scriptbox_manifest = "))
            .and_then(|l| l.split('"').nth(1))
            .unwrap();
        let json = String::from_utf8(BASE64.decode(armored).unwrap()).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(manifest.get("one.txt").is_some());
        assert_eq!(manifest["two.bin"]["kind"], "binary");
    }
}
