use cassette_check::environment::DEFAULT_REQUIRED;
use cassette_check::errors::CassetteError;
use cassette_check::fsm::PipelineState;
use cassette_check::run_with_runtime;
use cassette_check::runtime::{
    FakeFileSystem, FakeProcessRunner, FakeTerminal, ProcessOutput, ProductionRuntime,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Harness {
    _temp: tempfile::TempDir,
    root: PathBuf,
    fs: FakeFileSystem,
    runner: FakeProcessRunner,
    terminal: FakeTerminal,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        Self {
            _temp: temp,
            root,
            fs: FakeFileSystem::default(),
            runner: FakeProcessRunner::default(),
            terminal: FakeTerminal::default(),
        }
    }

    fn runtime(&self) -> ProductionRuntime {
        ProductionRuntime {
            file_system: Arc::new(self.fs.clone()),
            process_runner: Arc::new(self.runner.clone()),
            terminal: Arc::new(self.terminal.clone()),
        }
    }

    fn full_env(&self) -> Vec<(String, String)> {
        let mut env = DEFAULT_REQUIRED
            .iter()
            .map(|name| (name.to_string(), format!("{}-value", name.to_lowercase())))
            .collect::<Vec<_>>();
        for (key, value) in env.iter_mut() {
            match key.as_str() {
                "COMMIT_SHA" => *value = "abc123".to_string(),
                "GOPATH" => *value = self.root.display().to_string(),
                _ => {}
            }
        }
        env.push(("GITHUB_TOKEN".to_string(), "ghp_generic".to_string()));
        env.push((
            "CASSETTE_CHECK_LOG".to_string(),
            self.root.join("run.jsonl").display().to_string(),
        ));
        env
    }

    fn cassette_dir(&self) -> PathBuf {
        self.root.join("cassettes").join("beta")
    }

    fn seed_cassettes(&self) {
        self.fs
            .seed_file(self.cassette_dir().join("TestAccA.yaml"), "interactions: []");
    }

    fn run(&self, flags: &[&str], env: &[(String, String)]) -> Result<i32, CassetteError> {
        let mut args = vec![OsString::from("cassette-check")];
        args.extend(flags.iter().map(OsString::from));
        let env = env
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect::<Vec<_>>();
        run_with_runtime(&args, &env, Path::new("/work"), &self.runtime())
    }
}

fn go_test_output(passed: usize, failed: usize, skipped: usize) -> String {
    let mut out = String::new();
    for i in 0..passed {
        out.push_str(&format!("=== RUN   TestAccPass{i:02}\n--- PASS: TestAccPass{i:02} (0.01s)\n"));
    }
    for i in 0..failed {
        out.push_str(&format!("=== RUN   TestAccFail{i}\n--- FAIL: TestAccFail{i} (0.01s)\n"));
    }
    for i in 0..skipped {
        out.push_str(&format!("=== RUN   TestAccSkip{i}\n--- SKIP: TestAccSkip{i} (0.00s)\n"));
    }
    out.push_str("FAIL\n");
    out
}

fn ok(stdout: &str) -> Result<ProcessOutput, CassetteError> {
    Ok(ProcessOutput::success(stdout))
}

#[test]
fn missing_required_variable_is_named_and_nothing_is_cloned() {
    let h = Harness::new();
    h.fs.seed_file(
        "/work/check.toml",
        "[environment]\nrequired = [\"A\", \"B\"]\n",
    );
    let env = vec![
        ("A".to_string(), "1".to_string()),
        ("GITHUB_TOKEN".to_string(), "t".to_string()),
    ];

    let err = h
        .run(&["--config", "check.toml"], &env)
        .expect_err("B is missing");

    assert!(matches!(
        err.root(),
        CassetteError::MissingConfiguration { name, .. } if name == "B"
    ));
    assert_eq!(err.stage(), Some(PipelineState::Validating));
    assert!(err.to_string().contains("did not provide B environment variable"));
    assert!(h.runner.spawned().is_empty());
    assert!(h.fs.removed_dirs().is_empty());
}

#[test]
fn missing_both_credentials_fails_before_any_io() {
    let h = Harness::new();
    let env = h
        .full_env()
        .into_iter()
        .filter(|(k, _)| k != "GITHUB_TOKEN")
        .collect::<Vec<_>>();

    let err = h.run(&[], &env).expect_err("no token");
    assert!(matches!(err.root(), CassetteError::MissingCredential { .. }));
    assert!(h.runner.spawned().is_empty());
}

#[test]
fn validation_failure_leaves_no_run_log_behind() {
    let h = Harness::new();
    let env = h
        .full_env()
        .into_iter()
        .filter(|(k, _)| k != "GITHUB_TOKEN" && k != "CASSETTE_CHECK_LOG")
        .collect::<Vec<_>>();

    let err = h.run(&[], &env).expect_err("no token");
    assert_eq!(err.stage(), Some(PipelineState::Validating));
    assert!(!h.root.join(".cache").exists());
}

#[test]
fn partial_test_failures_still_exit_zero_with_full_summary() {
    let h = Harness::new();
    h.seed_cassettes();
    h.runner.push_response(ok(""));
    h.runner.push_response(ok(""));
    h.runner
        .push_response(Ok(ProcessOutput {
            exit_code: 1,
            stdout: go_test_output(47, 3, 2),
            stderr: String::new(),
        }));
    h.runner.push_response(ok(""));

    let code = h.run(&[], &h.full_env()).expect("harness completed");
    assert_eq!(code, 0);

    let lines = h.terminal.written_lines();
    assert!(lines[0].starts_with("47 passed tests: TestAccPass00, TestAccPass01"));
    assert_eq!(
        lines[1],
        "3 failed tests: TestAccFail0, TestAccFail1, TestAccFail2"
    );
    assert_eq!(lines[2], "2 skipped tests: TestAccSkip0, TestAccSkip1");
    assert_eq!(
        lines[3],
        "logs: gs://vcr-check-cassettes/beta/check-cassettes/abc123/replaying_test.log"
    );

    assert_eq!(
        h.runner.spawned_programs(),
        vec!["gsutil -m", "git clone", "go test", "gsutil -h"]
    );
    assert_eq!(h.fs.removed_dirs().len(), 3);
}

#[test]
fn fixtures_missing_on_main_skip_clone_and_still_clean_up() {
    let h = Harness::new();
    h.runner.push_response(Ok(ProcessOutput::failure(
        1,
        "CommandException: No URLs matched",
    )));

    let err = h
        .run(&["--fixture-branch", "main"], &h.full_env())
        .expect_err("no cassettes");

    assert!(matches!(err.root(), CassetteError::FixtureUnavailable(_)));
    assert!(err.to_string().starts_with("error fetching cassettes"));
    assert_eq!(h.runner.spawned_programs(), vec!["gsutil -m"]);
    assert_eq!(h.fs.removed_dirs(), vec![h.cassette_dir()]);
}

#[test]
fn non_default_branch_reads_branch_scoped_fixtures() {
    let h = Harness::new();
    h.runner
        .push_response(Ok(ProcessOutput::failure(1, "No URLs matched")));

    let _ = h.run(&["--fixture-branch", "feature-x", "--variant", "ga"], &h.full_env());
    let fetch = &h.runner.spawned()[0];
    assert!(fetch
        .args
        .contains(&"gs://ci-vcr-cassettes/ga/refs/heads/feature-x/fixtures/*".to_string()));
}

#[test]
fn scoped_token_wins_over_generic_token() {
    let h = Harness::new();
    h.seed_cassettes();
    h.runner.push_response(ok(""));
    h.runner
        .push_response(Ok(ProcessOutput::failure(128, "fatal: could not read from remote")));
    let mut env = h.full_env();
    env.push((
        "GITHUB_TOKEN_DOWNSTREAMS".to_string(),
        "ghp_scoped".to_string(),
    ));

    let err = h.run(&[], &env).expect_err("clone fails");
    assert_eq!(err.stage(), Some(PipelineState::Cloning));
    assert!(matches!(err.root(), CassetteError::SourceUnavailable(_)));

    let clone = &h.runner.spawned()[1];
    assert!(clone.args.iter().any(|arg| arg.contains("ghp_scoped")));
    assert!(!clone.args.iter().any(|arg| arg.contains("ghp_generic")));
    assert!(clone.args.contains(&"downstream-pr-abc123".to_string()));
    assert!(!err.to_string().contains("ghp_scoped"));
}

#[test]
fn harness_that_never_categorizes_is_fatal_but_keeps_its_log() {
    let h = Harness::new();
    h.seed_cassettes();
    h.runner.push_response(ok(""));
    h.runner.push_response(ok(""));
    h.runner
        .push_response(Ok(ProcessOutput::failure(2, "# build failed\nundefined: x")));

    let err = h
        .run(&["--log-dir", "/var/log/vcr"], &h.full_env())
        .expect_err("build failure");
    assert_eq!(err.stage(), Some(PipelineState::Replaying));
    assert!(matches!(err.root(), CassetteError::HarnessFailure(_)));
    assert_eq!(h.runner.spawned().len(), 3);
    assert_eq!(h.fs.removed_dirs().len(), 3);
    let kept = h
        .fs
        .file("/var/log/vcr/beta/abc123/replaying_test.log")
        .expect("crash log kept");
    assert!(kept.contains("build failed"));
}

#[test]
fn crash_log_upload_failure_still_reports_the_harness_failure() {
    let h = Harness::new();
    h.seed_cassettes();
    h.runner.push_response(ok(""));
    h.runner.push_response(ok(""));
    h.runner
        .push_response(Ok(ProcessOutput::failure(2, "# build failed\nundefined: x")));
    h.runner
        .push_response(Ok(ProcessOutput::failure(1, "AccessDeniedException: 403")));

    let err = h.run(&[], &h.full_env()).expect_err("build failure");
    assert_eq!(err.stage(), Some(PipelineState::Replaying));
    assert!(matches!(err.root(), CassetteError::HarnessFailure(_)));
    assert_eq!(
        h.runner.spawned_programs(),
        vec!["gsutil -m", "git clone", "go test", "gsutil -h"]
    );
    assert_eq!(h.fs.removed_dirs().len(), 3);
}

#[test]
fn upload_failure_is_fatal_after_cleanup() {
    let h = Harness::new();
    h.seed_cassettes();
    h.runner.push_response(ok(""));
    h.runner.push_response(ok(""));
    h.runner.push_response(ok(&go_test_output(1, 0, 0)));
    h.runner
        .push_response(Ok(ProcessOutput::failure(1, "AccessDeniedException: 403")));

    let err = h.run(&[], &h.full_env()).expect_err("upload denied");
    assert_eq!(err.stage(), Some(PipelineState::Reporting));
    assert!(matches!(err.root(), CassetteError::LogPersistenceFailure(_)));
    assert_eq!(h.fs.removed_dirs().len(), 3);
}

#[test]
fn log_dir_keeps_logs_locally_instead_of_uploading() {
    let h = Harness::new();
    h.seed_cassettes();
    h.runner.push_response(ok(""));
    h.runner.push_response(ok(""));
    h.runner.push_response(ok(&go_test_output(2, 0, 1)));

    let code = h
        .run(&["--log-dir", "/var/log/vcr"], &h.full_env())
        .expect("completed");
    assert_eq!(code, 0);
    assert_eq!(h.runner.spawned().len(), 3);
    let kept = h
        .fs
        .file("/var/log/vcr/beta/abc123/replaying_test.log")
        .expect("log kept");
    assert!(kept.contains("--- SKIP: TestAccSkip0"));
}

#[test]
fn list_env_prints_numbered_names_without_validating() {
    let h = Harness::new();
    let code = h.run(&["--list-env"], &[]).expect("listing");
    assert_eq!(code, 0);
    let lines = h.terminal.written_lines();
    assert_eq!(lines[0], "required environment variables:");
    assert!(lines[1].contains(" 1. COMMIT_SHA"));
    assert!(lines.iter().any(|line| line.contains("GOOGLE_VMWAREENGINE_PROJECT")));
    assert!(h.runner.spawned().is_empty());
}
