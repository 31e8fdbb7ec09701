use crate::errors::CassetteError;
use crate::logging::append_run_log;
use crate::runtime::FileSystem;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
struct OwnedDir {
    label: &'static str,
    path: PathBuf,
}

/// Owns the temporary directories of one run and releases them exactly once,
/// either through [`CleanupCoordinator::cleanup`] or, failing that, on drop.
pub struct CleanupCoordinator<'a> {
    fs: &'a dyn FileSystem,
    owned: Vec<OwnedDir>,
    ran: bool,
}

impl<'a> CleanupCoordinator<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self {
            fs,
            owned: Vec::new(),
            ran: false,
        }
    }

    /// Registers `path` for release. Registering the same path twice is a
    /// no-op.
    pub fn register(&mut self, label: &'static str, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        if self.owned.iter().any(|dir| dir.path == path) {
            return;
        }
        append_run_log(
            "debug",
            "cleanup.registered",
            json!({ "label": label, "path": path.display().to_string() }),
        );
        self.owned.push(OwnedDir { label, path });
    }

    pub fn has_run(&self) -> bool {
        self.ran
    }

    /// Releases every registered directory, newest first. Keeps going past
    /// failures and reports the first one. Later calls do nothing.
    pub fn cleanup(&mut self) -> Result<(), CassetteError> {
        if self.ran {
            return Ok(());
        }
        self.ran = true;

        let mut first_failure = None;
        for dir in self.owned.iter().rev() {
            match self.fs.remove_dir_all(&dir.path) {
                Ok(()) => append_run_log(
                    "info",
                    "cleanup.released",
                    json!({ "label": dir.label, "path": dir.path.display().to_string() }),
                ),
                Err(error) => {
                    append_run_log(
                        "error",
                        "cleanup.release_failed",
                        json!({
                            "label": dir.label,
                            "path": dir.path.display().to_string(),
                            "error": error.to_string()
                        }),
                    );
                    if first_failure.is_none() {
                        first_failure = Some(CassetteError::CleanupFailure(format!(
                            "could not remove {} {}: {error}",
                            dir.label,
                            dir.path.display()
                        )));
                    }
                }
            }
        }

        match first_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for CleanupCoordinator<'_> {
    fn drop(&mut self) {
        if !self.ran {
            if let Err(error) = self.cleanup() {
                append_run_log(
                    "error",
                    "cleanup.drop_failed",
                    json!({ "error": error.to_string() }),
                );
            }
        }
    }
}
