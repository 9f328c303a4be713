//! Per-message scratch directory: created with owner-only permissions,
//! registered for cleanup on every exit path (including early returns on
//! error, via an explicit `cleanup()` call rather than `Drop`, so a worker
//! that times out mid-pipeline doesn't race a background task still writing
//! into it).

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

pub struct TempWorkspace {
    dir: PathBuf,
}

impl TempWorkspace {
    pub fn create() -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("claudio-msg-{}", Uuid::new_v4()));
        std::fs::create_dir(&dir)?;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn cleanup(&self) {
        if let Err(err) = std::fs::remove_dir_all(&self.dir) {
            warn!(path = %self.dir.display(), error = %err, "failed to clean up message workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_makes_a_restricted_directory() {
        let ws = TempWorkspace::create().unwrap();
        assert!(ws.path().is_dir());
        let mode = std::fs::metadata(ws.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
        ws.cleanup();
        assert!(!ws.path().exists());
    }
}
