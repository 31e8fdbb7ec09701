use crate::environment::Credential;
use crate::errors::CassetteError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessRequest, ProcessRunner};
use crate::types::ProviderVariant;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const DOWNSTREAM_BRANCH_PREFIX: &str = "downstream-pr-";

/// A repository branch and, once resolved, the working copy that holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub branch: String,
    pub path: Option<PathBuf>,
}

impl Repository {
    pub fn new(name: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branch: branch.into(),
            path: None,
        }
    }

    pub fn for_variant(variant: ProviderVariant, branch: impl Into<String>) -> Self {
        Self::new(variant.repo_name(), branch)
    }
}

pub fn downstream_branch(commit: &str) -> String {
    format!("{DOWNSTREAM_BRANCH_PREFIX}{commit}")
}

pub trait SourceControl {
    /// Local working-copy path for `repo`. Pure: no I/O, same input same path.
    fn resolve_path(&self, repo: &Repository) -> PathBuf;

    /// Materializes `repo.branch` at `repo.path`, which must already be set.
    fn clone(&self, repo: &Repository) -> Result<(), CassetteError>;
}

/// Git-backed source control rooted at `{root}/src/github.com/{owner}`.
pub struct Controller<'a> {
    runner: &'a dyn ProcessRunner,
    root: PathBuf,
    owner: String,
    credential: Credential,
    cloned: Mutex<BTreeSet<PathBuf>>,
}

impl<'a> Controller<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        root: impl AsRef<Path>,
        owner: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            runner,
            root: root.as_ref().to_path_buf(),
            owner: owner.into(),
            credential,
            cloned: Mutex::new(BTreeSet::new()),
        }
    }

    fn remote_url(&self, name: &str) -> String {
        format!(
            "https://{}:{}@github.com/{}/{}",
            self.owner,
            self.credential.expose(),
            self.owner,
            name
        )
    }

    fn redacted_url(&self, name: &str) -> String {
        format!("https://github.com/{}/{}", self.owner, name)
    }
}

impl SourceControl for Controller<'_> {
    fn resolve_path(&self, repo: &Repository) -> PathBuf {
        self.root
            .join("src")
            .join("github.com")
            .join(&self.owner)
            .join(&repo.name)
    }

    fn clone(&self, repo: &Repository) -> Result<(), CassetteError> {
        let path = repo.path.as_ref().ok_or_else(|| {
            CassetteError::SourceUnavailable(format!(
                "path for {} was never resolved",
                repo.name
            ))
        })?;

        let mut cloned = self
            .cloned
            .lock()
            .map_err(|_| CassetteError::Process("clone registry poisoned".to_string()))?;
        if cloned.contains(path) {
            return Err(CassetteError::SourceUnavailable(format!(
                "{} was already cloned in this run",
                path.display()
            )));
        }

        append_run_log(
            "info",
            "source.clone.started",
            json!({
                "remote": self.redacted_url(&repo.name),
                "branch": repo.branch,
                "path": path.display().to_string()
            }),
        );

        let out = self.runner.run(ProcessRequest::new(
            "git",
            [
                "clone".to_string(),
                "--depth".to_string(),
                "1".to_string(),
                "--branch".to_string(),
                repo.branch.clone(),
                self.remote_url(&repo.name),
                path.display().to_string(),
            ],
        ));
        let out = match out {
            Ok(out) => out,
            Err(error) => {
                append_run_log(
                    "error",
                    "source.clone.spawn_failed",
                    json!({ "branch": repo.branch, "error": error.to_string() }),
                );
                return Err(CassetteError::SourceUnavailable(format!(
                    "could not run git clone: {error}"
                )));
            }
        };

        if out.exit_code != 0 {
            let stderr = redact(&out.stderr, self.credential.expose());
            append_run_log(
                "error",
                "source.clone.failed",
                json!({
                    "remote": self.redacted_url(&repo.name),
                    "branch": repo.branch,
                    "exit_code": out.exit_code,
                    "stderr": stderr
                }),
            );
            return Err(CassetteError::SourceUnavailable(format!(
                "git clone of {} at {} failed: {}",
                self.redacted_url(&repo.name),
                repo.branch,
                stderr.trim()
            )));
        }

        cloned.insert(path.clone());
        append_run_log(
            "info",
            "source.clone.succeeded",
            json!({
                "branch": repo.branch,
                "path": path.display().to_string()
            }),
        );
        Ok(())
    }
}

fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "<redacted>")
}
