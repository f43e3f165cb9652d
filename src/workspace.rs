use crate::errors::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A uniquely named, per-execution working directory. Holds staged inputs
/// and produced outputs; destroyed exactly once, either explicitly via
/// [`Workspace::cleanup`] or by the Drop backstop. Removal failures are
/// logged, never surfaced as a run failure.
pub struct Workspace {
    path: PathBuf,
    cleanup_on_drop: bool,
}

impl Workspace {
    /// Allocate a fresh directory under `base`. The uuid-v4 name keeps
    /// concurrent executions collision-free without any locking.
    pub fn allocate(base: &Path) -> Result<Self> {
        let name = format!("run-{}", uuid::Uuid::new_v4());
        let path = base.join(name);
        fs::create_dir_all(&path)?;
        debug!("created workspace {}", path.display());
        Ok(Self {
            path,
            cleanup_on_drop: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory tree now. Best effort: failures are logged and
    /// swallowed so cleanup can never turn a finished run into an error.
    pub fn cleanup(mut self) {
        self.remove_tree();
        self.cleanup_on_drop = false;
    }

    fn remove_tree(&self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("removed workspace {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove workspace {}: {e}", self.path.display()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.cleanup_on_drop {
            self.remove_tree();
        }
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn allocations_are_collision_free() {
        let base = tempfile::tempdir().unwrap();
        let workspaces: Vec<Workspace> = (0..32)
            .map(|_| Workspace::allocate(base.path()).unwrap())
            .collect();
        let names: HashSet<PathBuf> = workspaces.iter().map(|w| w.path().to_path_buf()).collect();
        assert_eq!(names.len(), 32);
        for ws in &workspaces {
            assert!(ws.path().is_dir());
        }
    }

    #[test]
    fn explicit_cleanup_removes_the_tree() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(base.path()).unwrap();
        let path = ws.path().to_path_buf();
        fs::create_dir(path.join("sub")).unwrap();
        fs::write(path.join("sub").join("deep.txt"), "x").unwrap();
        ws.cleanup();
        assert!(!path.exists());
    }

    #[test]
    fn drop_is_the_backstop() {
        let base = tempfile::tempdir().unwrap();
        let path = {
            let ws = Workspace::allocate(base.path()).unwrap();
            fs::write(ws.path().join("f.txt"), "x").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn cleanup_of_already_missing_dir_is_silent() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(base.path()).unwrap();
        fs::remove_dir_all(ws.path()).unwrap();
        ws.cleanup();
    }
}
