use crate::environment::Environment;
use crate::errors::CassetteError;
use crate::logging::append_run_log;
use crate::outcome::{parse_harness_output, TestOutcomeSet};
use crate::runtime::{FileSystem, ProcessRequest, ProcessRunner};
use crate::types::{ProviderVariant, RunMode};
use serde_json::json;
use std::path::{Path, PathBuf};

/// Everything one harness invocation needs. Built once, moved into `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub mode: RunMode,
    pub variant: ProviderVariant,
    pub repo_path: PathBuf,
    pub cassette_path: PathBuf,
    pub log_path: PathBuf,
}

impl RunSpec {
    pub fn raw_log_file(&self) -> PathBuf {
        raw_log_file(&self.log_path, self.mode)
    }
}

pub fn raw_log_file(log_path: &Path, mode: RunMode) -> PathBuf {
    log_path.join(mode.log_file_name())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessSettings {
    pub program: String,
    pub parallelism: u32,
    pub timeout: String,
    pub test_pattern: String,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            program: "go".to_string(),
            parallelism: 32,
            timeout: "240m".to_string(),
            test_pattern: "TestAcc".to_string(),
        }
    }
}

pub trait ReplayHarness {
    /// Runs the suite once. Per-test failures are data in the returned set;
    /// only a harness that could not run at all is an error.
    fn run(&self, spec: RunSpec) -> Result<TestOutcomeSet, CassetteError>;
}

pub struct ReplayExecutor<'a> {
    runner: &'a dyn ProcessRunner,
    fs: &'a dyn FileSystem,
    settings: HarnessSettings,
    env: Environment,
}

impl<'a> ReplayExecutor<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        fs: &'a dyn FileSystem,
        settings: HarnessSettings,
        env: Environment,
    ) -> Self {
        Self {
            runner,
            fs,
            settings,
            env,
        }
    }

    pub fn request_for(&self, spec: &RunSpec) -> ProcessRequest {
        let args = vec![
            "test".to_string(),
            format!("./{}/...", spec.variant.package_dir()),
            "-parallel".to_string(),
            self.settings.parallelism.to_string(),
            "-v".to_string(),
            "-run".to_string(),
            self.settings.test_pattern.clone(),
            "-timeout".to_string(),
            self.settings.timeout.clone(),
        ];

        let mut env = self.env.entries().to_vec();
        if let Some(key) = self.env.get("SA_KEY") {
            env.push(("GOOGLE_CREDENTIALS".to_string(), key.to_string()));
        }
        env.extend([
            ("VCR_MODE".to_string(), spec.mode.vcr_mode().to_string()),
            (
                "VCR_PATH".to_string(),
                spec.cassette_path.display().to_string(),
            ),
            ("TF_LOG".to_string(), "DEBUG".to_string()),
            (
                "TF_LOG_PATH_MASK".to_string(),
                spec.log_path.join("%s.log").display().to_string(),
            ),
            ("TF_ACC".to_string(), "1".to_string()),
            ("TF_SCHEMA_PANIC_ON_ERROR".to_string(), "1".to_string()),
        ]);

        ProcessRequest::new(&self.settings.program, args)
            .in_dir(&spec.repo_path)
            .with_env(env)
    }
}

impl ReplayHarness for ReplayExecutor<'_> {
    fn run(&self, spec: RunSpec) -> Result<TestOutcomeSet, CassetteError> {
        let request = self.request_for(&spec);
        append_run_log(
            "info",
            "executor.run.started",
            json!({
                "mode": spec.mode.as_str(),
                "variant": spec.variant.as_str(),
                "program": request.program,
                "args": request.args,
                "cwd": spec.repo_path.display().to_string(),
                "env_keys": request.env_keys()
            }),
        );

        self.fs.create_dir_all(&spec.log_path).map_err(|e| {
            CassetteError::HarnessFailure(format!(
                "could not create log directory {}: {e}",
                spec.log_path.display()
            ))
        })?;

        let out = self.runner.run(request).map_err(|e| {
            append_run_log(
                "error",
                "executor.run.spawn_failed",
                json!({ "error": e.to_string() }),
            );
            CassetteError::HarnessFailure(format!(
                "could not run {}: {e}",
                self.settings.program
            ))
        })?;

        // The raw log is the audit trail; write it before deciding anything.
        let raw = format!("{}{}", out.stdout, out.stderr);
        let raw_log = spec.raw_log_file();
        self.fs.write_string(&raw_log, &raw).map_err(|e| {
            CassetteError::HarnessFailure(format!(
                "could not write harness log {}: {e}",
                raw_log.display()
            ))
        })?;

        let parsed = parse_harness_output(&raw);
        let outcomes = parsed.outcomes;
        append_run_log(
            if out.exit_code == 0 { "info" } else { "warn" },
            "executor.run.classified",
            json!({
                "exit_code": out.exit_code,
                "passed": outcomes.passed().len(),
                "failed": outcomes.failed().len(),
                "skipped": outcomes.skipped().len(),
                "unfinished": parsed.unfinished,
                "raw_log": raw_log.display().to_string()
            }),
        );

        if out.exit_code != 0 && outcomes.is_empty() {
            let lines = out.stderr.lines().collect::<Vec<_>>();
            let tail = lines[lines.len().saturating_sub(5)..].join("\n");
            return Err(CassetteError::HarnessFailure(format!(
                "{} exited with {} before any test was categorized: {}",
                self.settings.program, out.exit_code, tail
            )));
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentValidator;
    use crate::runtime::{FakeFileSystem, FakeProcessRunner, ProcessOutput};
    use crate::types::EnvMap;

    fn spec() -> RunSpec {
        RunSpec {
            mode: RunMode::Replaying,
            variant: ProviderVariant::Beta,
            repo_path: PathBuf::from("/go/src/github.com/modular-magician/terraform-provider-google-beta"),
            cassette_path: PathBuf::from("/go/cassettes/beta"),
            log_path: PathBuf::from("/go/testlogs/replaying-beta"),
        }
    }

    fn environment() -> Environment {
        let mut source = EnvMap::new();
        source.insert("GOOGLE_PROJECT".to_string(), "proj".to_string());
        source.insert("SA_KEY".to_string(), "{\"key\":1}".to_string());
        EnvironmentValidator::new(["GOOGLE_PROJECT", "SA_KEY"], Vec::<String>::new())
            .validate(&source)
            .expect("env")
    }

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn invokes_harness_in_replay_mode_against_fetched_cassettes() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(output(0, "--- PASS: TestAccA (1.00s)\n", "")));
        let fs = FakeFileSystem::default();
        let executor =
            ReplayExecutor::new(&runner, &fs, HarnessSettings::default(), environment());

        let outcomes = executor.run(spec()).expect("ran");
        assert_eq!(outcomes.passed(), ["TestAccA".to_string()]);

        let request = &runner.spawned()[0];
        assert_eq!(request.program, "go");
        assert_eq!(request.args[1], "./google-beta/...");
        assert_eq!(request.cwd, Some(spec().repo_path));
        let env = |key: &str| {
            request
                .env
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(env("VCR_MODE").as_deref(), Some("REPLAYING"));
        assert_eq!(env("VCR_PATH").as_deref(), Some("/go/cassettes/beta"));
        assert_eq!(env("GOOGLE_CREDENTIALS").as_deref(), Some("{\"key\":1}"));
        assert_eq!(env("GOOGLE_PROJECT").as_deref(), Some("proj"));
    }

    #[test]
    fn per_test_failures_with_nonzero_exit_are_not_errors() {
        let mut stdout = String::new();
        for i in 0..47 {
            stdout.push_str(&format!("--- PASS: TestAccPass{i} (0.01s)\n"));
        }
        for i in 0..3 {
            stdout.push_str(&format!("--- FAIL: TestAccFail{i} (0.01s)\n"));
        }
        for i in 0..2 {
            stdout.push_str(&format!("--- SKIP: TestAccSkip{i} (0.00s)\n"));
        }
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(output(1, &stdout, "FAIL\n")));
        let fs = FakeFileSystem::default();
        let executor =
            ReplayExecutor::new(&runner, &fs, HarnessSettings::default(), environment());

        let outcomes = executor.run(spec()).expect("partial failures are data");
        assert_eq!(outcomes.passed().len(), 47);
        assert_eq!(outcomes.failed().len(), 3);
        assert_eq!(outcomes.skipped().len(), 2);
    }

    #[test]
    fn raw_log_is_written_even_when_harness_crashes() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(output(2, "", "# build failed\nundefined: foo\n")));
        let fs = FakeFileSystem::default();
        let executor =
            ReplayExecutor::new(&runner, &fs, HarnessSettings::default(), environment());

        let err = executor.run(spec()).expect_err("nothing categorized");
        assert!(matches!(err, CassetteError::HarnessFailure(message) if message.contains("undefined: foo")));
        let log = fs.file(spec().raw_log_file()).expect("raw log kept");
        assert!(log.contains("build failed"));
    }

    #[test]
    fn unspawnable_harness_is_harness_failure() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Err(CassetteError::Process("go: not found".to_string())));
        let fs = FakeFileSystem::default();
        let executor =
            ReplayExecutor::new(&runner, &fs, HarnessSettings::default(), environment());

        let err = executor.run(spec()).expect_err("spawn failed");
        assert!(matches!(err, CassetteError::HarnessFailure(_)));
    }

    #[test]
    fn clean_exit_with_no_tests_is_an_empty_run() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(output(0, "testing: warning: no tests to run\nPASS\n", "")));
        let fs = FakeFileSystem::default();
        let executor =
            ReplayExecutor::new(&runner, &fs, HarnessSettings::default(), environment());

        let outcomes = executor.run(spec()).expect("empty but fine");
        assert!(outcomes.is_empty());
    }
}
