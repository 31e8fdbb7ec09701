use crate::errors::CassetteError;
use crate::executor::raw_log_file;
use crate::logging::append_run_log;
use crate::outcome::TestOutcomeSet;
use crate::runtime::{FileSystem, ProcessRequest, ProcessRunner, Terminal};
use crate::types::{ProviderVariant, RunMode};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Durable destination for raw harness logs, keyed by mode and variant.
pub trait LogSink {
    fn upload(&self, mode: RunMode, variant: ProviderVariant, log: &[u8])
        -> Result<(), CassetteError>;

    /// Human-readable location of the uploaded log, for the summary.
    fn location(&self, mode: RunMode, variant: ProviderVariant) -> String;
}

pub struct BucketLogSink<'a> {
    runner: &'a dyn ProcessRunner,
    fs: &'a dyn FileSystem,
    bucket: String,
    run_key: String,
    staging_dir: PathBuf,
}

impl<'a> BucketLogSink<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        fs: &'a dyn FileSystem,
        bucket: impl Into<String>,
        run_key: impl Into<String>,
        staging_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            runner,
            fs,
            bucket: bucket.into(),
            run_key: run_key.into(),
            staging_dir: staging_dir.as_ref().to_path_buf(),
        }
    }

    pub fn object_url(&self, mode: RunMode, variant: ProviderVariant) -> String {
        format!(
            "gs://{}/{}/check-cassettes/{}/{}",
            self.bucket,
            variant.as_str(),
            self.run_key,
            mode.log_file_name()
        )
    }
}

impl LogSink for BucketLogSink<'_> {
    fn upload(
        &self,
        mode: RunMode,
        variant: ProviderVariant,
        log: &[u8],
    ) -> Result<(), CassetteError> {
        self.fs.create_dir_all(&self.staging_dir)?;
        let staged = self
            .staging_dir
            .join(format!("{}-{}", variant.as_str(), mode.log_file_name()));
        self.fs
            .write_string(&staged, &String::from_utf8_lossy(log))?;

        let url = self.object_url(mode, variant);
        let out = self.runner.run(ProcessRequest::new(
            "gsutil",
            [
                "-h".to_string(),
                "Content-Type:text/plain".to_string(),
                "-q".to_string(),
                "cp".to_string(),
                staged.display().to_string(),
                url.clone(),
            ],
        ))?;
        if out.exit_code != 0 {
            return Err(CassetteError::Process(format!(
                "gsutil cp to {url} exited with {}: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    fn location(&self, mode: RunMode, variant: ProviderVariant) -> String {
        self.object_url(mode, variant)
    }
}

/// Keeps logs under a local directory that outlives the run.
pub struct DirectoryLogSink<'a> {
    fs: &'a dyn FileSystem,
    dir: PathBuf,
    run_key: String,
}

impl<'a> DirectoryLogSink<'a> {
    pub fn new(fs: &'a dyn FileSystem, dir: impl AsRef<Path>, run_key: impl Into<String>) -> Self {
        Self {
            fs,
            dir: dir.as_ref().to_path_buf(),
            run_key: run_key.into(),
        }
    }

    fn target(&self, mode: RunMode, variant: ProviderVariant) -> PathBuf {
        self.dir
            .join(variant.as_str())
            .join(&self.run_key)
            .join(mode.log_file_name())
    }
}

impl LogSink for DirectoryLogSink<'_> {
    fn upload(
        &self,
        mode: RunMode,
        variant: ProviderVariant,
        log: &[u8],
    ) -> Result<(), CassetteError> {
        let target = self.target(mode, variant);
        if let Some(parent) = target.parent() {
            self.fs.create_dir_all(parent)?;
        }
        self.fs
            .write_string(&target, &String::from_utf8_lossy(log))
    }

    fn location(&self, mode: RunMode, variant: ProviderVariant) -> String {
        self.target(mode, variant).display().to_string()
    }
}

pub struct Reporter<'a> {
    fs: &'a dyn FileSystem,
    sink: &'a dyn LogSink,
    log_path: PathBuf,
}

impl<'a> Reporter<'a> {
    pub fn new(fs: &'a dyn FileSystem, sink: &'a dyn LogSink, log_path: impl AsRef<Path>) -> Self {
        Self {
            fs,
            sink,
            log_path: log_path.as_ref().to_path_buf(),
        }
    }

    /// Persists the raw harness log for `mode`/`variant`. Returns the sink
    /// location. Any failure is a `LogPersistenceFailure`.
    pub fn upload_logs(
        &self,
        mode: RunMode,
        variant: ProviderVariant,
    ) -> Result<String, CassetteError> {
        let source = raw_log_file(&self.log_path, mode);
        let log = self.fs.read_to_string(&source).map_err(|e| {
            CassetteError::LogPersistenceFailure(format!(
                "could not read harness log {}: {e}",
                source.display()
            ))
        })?;
        let location = self.sink.location(mode, variant);

        if let Err(error) = self.sink.upload(mode, variant, log.as_bytes()) {
            append_run_log(
                "error",
                "report.logs.upload_failed",
                json!({
                    "mode": mode.as_str(),
                    "variant": variant.as_str(),
                    "location": location,
                    "error": error.to_string()
                }),
            );
            return Err(CassetteError::LogPersistenceFailure(format!(
                "upload to {location} failed: {error}"
            )));
        }

        append_run_log(
            "info",
            "report.logs.uploaded",
            json!({
                "mode": mode.as_str(),
                "variant": variant.as_str(),
                "location": location,
                "bytes": log.len(),
                "sha256": sha256_hex(log.as_bytes())
            }),
        );
        Ok(location)
    }
}

/// One line per category, always passed, failed, skipped.
pub fn summarize(outcomes: &TestOutcomeSet) -> String {
    [
        ("passed", outcomes.passed()),
        ("failed", outcomes.failed()),
        ("skipped", outcomes.skipped()),
    ]
    .iter()
    .map(|(label, ids)| {
        let members = if ids.is_empty() {
            "none".to_string()
        } else {
            ids.join(", ")
        };
        format!("{} {label} tests: {members}", ids.len())
    })
    .collect::<Vec<_>>()
    .join("\n")
}

pub fn print_summary(terminal: &dyn Terminal, outcomes: &TestOutcomeSet) -> Result<(), CassetteError> {
    for line in summarize(outcomes).lines() {
        terminal.write_line(line)?;
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
