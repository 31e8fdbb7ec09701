use crate::errors::CassetteError;
use crate::logging::append_run_log;
use crate::runtime::{FileSystem, ProcessRequest, ProcessRunner};
use crate::types::ProviderVariant;
use serde_json::json;
use std::path::{Path, PathBuf};

pub const DEFAULT_BRANCH: &str = "main";

pub trait FixtureStore {
    /// Where `fetch` puts the cassettes for `variant`. Pure.
    fn cassette_dir(&self, variant: ProviderVariant) -> PathBuf;

    /// Downloads the cassettes for `variant` recorded on `branch` into
    /// `cassette_dir(variant)`. An empty `filter` fetches the whole set,
    /// otherwise only cassettes whose name starts with `filter`.
    fn fetch(
        &self,
        variant: ProviderVariant,
        branch: &str,
        filter: &str,
    ) -> Result<PathBuf, CassetteError>;
}

/// Fixture store backed by a GCS bucket, copied down with `gsutil`.
pub struct BucketFixtureStore<'a> {
    runner: &'a dyn ProcessRunner,
    fs: &'a dyn FileSystem,
    bucket: String,
    root: PathBuf,
}

impl<'a> BucketFixtureStore<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        fs: &'a dyn FileSystem,
        bucket: impl Into<String>,
        root: impl AsRef<Path>,
    ) -> Self {
        Self {
            runner,
            fs,
            bucket: bucket.into(),
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn source_url(&self, variant: ProviderVariant, branch: &str, filter: &str) -> String {
        let prefix = if branch == DEFAULT_BRANCH {
            format!("gs://{}/{}/fixtures", self.bucket, variant.as_str())
        } else {
            format!(
                "gs://{}/{}/refs/heads/{}/fixtures",
                self.bucket,
                variant.as_str(),
                branch
            )
        };
        format!("{prefix}/{filter}*")
    }
}

impl FixtureStore for BucketFixtureStore<'_> {
    fn cassette_dir(&self, variant: ProviderVariant) -> PathBuf {
        self.root.join("cassettes").join(variant.as_str())
    }

    fn fetch(
        &self,
        variant: ProviderVariant,
        branch: &str,
        filter: &str,
    ) -> Result<PathBuf, CassetteError> {
        let dest = self.cassette_dir(variant);
        let source = self.source_url(variant, branch, filter);
        append_run_log(
            "info",
            "cassettes.fetch.started",
            json!({
                "variant": variant.as_str(),
                "branch": branch,
                "filter": filter,
                "source": source,
                "dest": dest.display().to_string()
            }),
        );

        self.fs.create_dir_all(&dest).map_err(|e| {
            CassetteError::FixtureUnavailable(format!(
                "could not create {}: {e}",
                dest.display()
            ))
        })?;

        let out = self
            .runner
            .run(ProcessRequest::new(
                "gsutil",
                [
                    "-m".to_string(),
                    "-q".to_string(),
                    "cp".to_string(),
                    source.clone(),
                    dest.display().to_string(),
                ],
            ))
            .map_err(|e| CassetteError::FixtureUnavailable(format!("could not run gsutil: {e}")))?;

        if out.exit_code != 0 {
            append_run_log(
                "error",
                "cassettes.fetch.failed",
                json!({
                    "variant": variant.as_str(),
                    "branch": branch,
                    "exit_code": out.exit_code,
                    "stderr": out.stderr
                }),
            );
            return Err(CassetteError::FixtureUnavailable(format!(
                "no cassettes at {source} for branch {branch}: {}",
                out.stderr.trim()
            )));
        }

        let fetched = self.fs.list_files(&dest)?;
        if fetched.is_empty() {
            append_run_log(
                "error",
                "cassettes.fetch.empty",
                json!({ "variant": variant.as_str(), "branch": branch, "source": source }),
            );
            return Err(CassetteError::FixtureUnavailable(format!(
                "no cassettes matched {source} for branch {branch}"
            )));
        }

        append_run_log(
            "info",
            "cassettes.fetch.succeeded",
            json!({
                "variant": variant.as_str(),
                "branch": branch,
                "count": fetched.len()
            }),
        );
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FakeFileSystem, FakeProcessRunner, ProcessOutput};

    #[test]
    fn main_branch_reads_top_level_fixtures() {
        let runner = FakeProcessRunner::default();
        let fs = FakeFileSystem::default();
        let store = BucketFixtureStore::new(&runner, &fs, "ci-vcr-cassettes", "/work");
        assert_eq!(
            store.source_url(ProviderVariant::Beta, "main", ""),
            "gs://ci-vcr-cassettes/beta/fixtures/*"
        );
        assert_eq!(
            store.source_url(ProviderVariant::Ga, "auto-pr-7", "TestAccCompute"),
            "gs://ci-vcr-cassettes/ga/refs/heads/auto-pr-7/fixtures/TestAccCompute*"
        );
    }

    #[test]
    fn fetch_populates_well_known_directory() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::success("")));
        let fs = FakeFileSystem::with_file("/work/cassettes/beta/TestAccA.yaml", "interactions: []");
        let store = BucketFixtureStore::new(&runner, &fs, "ci-vcr-cassettes", "/work");

        let dir = store
            .fetch(ProviderVariant::Beta, "main", "")
            .expect("fetched");
        assert_eq!(dir, PathBuf::from("/work/cassettes/beta"));
        let spawned = runner.spawned();
        assert_eq!(spawned[0].program, "gsutil");
        assert_eq!(spawned[0].args.last().map(String::as_str), Some("/work/cassettes/beta"));
    }

    #[test]
    fn missing_fixture_set_is_fixture_unavailable() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::failure(
            1,
            "CommandException: No URLs matched",
        )));
        let fs = FakeFileSystem::default();
        let store = BucketFixtureStore::new(&runner, &fs, "ci-vcr-cassettes", "/work");

        let err = store
            .fetch(ProviderVariant::Beta, "main", "")
            .expect_err("not found");
        assert!(matches!(err, CassetteError::FixtureUnavailable(message) if message.contains("No URLs matched")));
    }

    #[test]
    fn empty_copy_is_fixture_unavailable() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::success("")));
        let fs = FakeFileSystem::default();
        let store = BucketFixtureStore::new(&runner, &fs, "ci-vcr-cassettes", "/work");

        let err = store
            .fetch(ProviderVariant::Ga, "main", "TestAccNothing")
            .expect_err("empty");
        assert!(matches!(err, CassetteError::FixtureUnavailable(_)));
    }
}
