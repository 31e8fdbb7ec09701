//! Stage sequencing for one cassette check.
//!
//! `Validating → Fetching → Cloning → Replaying → Reporting → CleaningUp →
//! {Done, Failed}`. Any stage error collapses straight to `CleaningUp`, which
//! runs exactly once no matter how the run ends.

use crate::cassettes::FixtureStore;
use crate::cleanup::CleanupCoordinator;
use crate::environment::{
    render_required_list, require_credential, Credential, Environment, EnvironmentValidator,
};
use crate::errors::CassetteError;
use crate::executor::{ReplayHarness, RunSpec};
use crate::fsm::{PipelineSnapshot, PipelineState};
use crate::logging::append_run_log;
use crate::outcome::TestOutcomeSet;
use crate::report::{print_summary, summarize, Reporter};
use crate::runtime::{FileSystem, Terminal};
use crate::source::{downstream_branch, Repository, SourceControl};
use crate::types::{EnvMap, ProviderVariant, RunMode};
use serde_json::json;
use std::path::PathBuf;

pub const COMMIT_VAR: &str = "COMMIT_SHA";

#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub environment: Environment,
    pub credential: Credential,
    pub commit: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    pub variant: ProviderVariant,
    pub fixture_branch: String,
    pub filter: String,
    pub log_path: PathBuf,
}

pub struct Collaborators<'c> {
    pub fixtures: &'c dyn FixtureStore,
    pub source: &'c dyn SourceControl,
    pub harness: &'c dyn ReplayHarness,
    pub reporter: &'c Reporter<'c>,
    pub terminal: &'c dyn Terminal,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcomes: TestOutcomeSet,
    pub summary: String,
    pub log_location: String,
    pub final_state: PipelineState,
    pub cleanup_error: Option<CassetteError>,
}

pub struct Pipeline<'a> {
    fs: &'a dyn FileSystem,
    fsm: PipelineSnapshot,
    cleanup: CleanupCoordinator<'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self {
            fs,
            fsm: PipelineSnapshot::default(),
            cleanup: CleanupCoordinator::new(fs),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.fsm.state
    }

    pub fn history(&self) -> &[PipelineState] {
        &self.fsm.history
    }

    pub fn cleanup_ran(&self) -> bool {
        self.cleanup.has_run()
    }

    /// Checks configuration and resolves the credential. Pure over `env`: a
    /// failure here happens before any clone, fetch or harness run.
    pub fn validate(
        &mut self,
        validator: &EnvironmentValidator,
        credential_names: (&str, &str),
        env: &EnvMap,
    ) -> Result<PipelineInputs, CassetteError> {
        let checked = validator.validate(env).and_then(|environment| {
            let credential = require_credential(credential_names.0, credential_names.1, env)?;
            let commit = environment
                .get(COMMIT_VAR)
                .map(str::to_string)
                .ok_or_else(|| CassetteError::MissingConfiguration {
                    name: COMMIT_VAR.to_string(),
                    listing: render_required_list(validator.required()),
                })?;
            Ok(PipelineInputs {
                environment,
                credential,
                commit,
            })
        });

        match checked {
            Ok(inputs) => Ok(inputs),
            Err(error) => Err(self.abort(error)),
        }
    }

    /// Fails the run from its current stage: cleanup, then `Failed`. Returns
    /// the stage-wrapped error for the caller to propagate.
    pub fn abort(&mut self, error: CassetteError) -> CassetteError {
        let error = error.at_stage(self.fsm.state);
        self.settle(Some(&error));
        error
    }

    pub fn execute(
        &mut self,
        inputs: &PipelineInputs,
        options: &RunOptions,
        collab: &Collaborators<'_>,
    ) -> Result<RunReport, CassetteError> {
        let result = self.run_stages(inputs, options, collab);
        let failure = result.as_ref().err();
        let (final_state, cleanup_error) = self.settle(failure);

        if let Some(error) = &cleanup_error {
            let warning = format!("warning: {error}");
            if let Err(write_error) = collab.terminal.write_error_line(&warning) {
                append_run_log(
                    "warn",
                    "pipeline.terminal.write_failed",
                    json!({ "line": warning, "error": write_error.to_string() }),
                );
            }
        }

        let (outcomes, log_location) = result?;
        let summary = summarize(&outcomes);
        Ok(RunReport {
            outcomes,
            summary,
            log_location,
            final_state,
            cleanup_error,
        })
    }

    fn run_stages(
        &mut self,
        inputs: &PipelineInputs,
        options: &RunOptions,
        collab: &Collaborators<'_>,
    ) -> Result<(TestOutcomeSet, String), CassetteError> {
        let variant = options.variant;

        self.enter(PipelineState::Fetching)?;
        self.cleanup
            .register("cassettes", collab.fixtures.cassette_dir(variant));
        let cassette_path = collab
            .fixtures
            .fetch(variant, &options.fixture_branch, &options.filter)
            .map_err(|e| e.at_stage(PipelineState::Fetching))?;

        self.enter(PipelineState::Cloning)?;
        let mut repo = Repository::for_variant(variant, downstream_branch(&inputs.commit));
        let repo_path = collab.source.resolve_path(&repo);
        if !self.fs.exists(&repo_path) {
            self.cleanup.register("working copy", &repo_path);
        }
        repo.path = Some(repo_path.clone());
        collab
            .source
            .clone(&repo)
            .map_err(|e| e.at_stage(PipelineState::Cloning))?;

        self.enter(PipelineState::Replaying)?;
        self.cleanup.register("harness logs", &options.log_path);
        let spec = RunSpec {
            mode: options.mode,
            variant,
            repo_path,
            cassette_path,
            log_path: options.log_path.clone(),
        };
        let outcomes = match collab.harness.run(spec) {
            Ok(outcomes) => outcomes,
            Err(error) => {
                persist_crash_log(collab.reporter, options.mode, variant);
                return Err(error.at_stage(PipelineState::Replaying));
            }
        };

        self.enter(PipelineState::Reporting)?;
        let log_location = collab
            .reporter
            .upload_logs(options.mode, variant)
            .map_err(|e| e.at_stage(PipelineState::Reporting))?;
        print_summary(collab.terminal, &outcomes)
            .map_err(|e| e.at_stage(PipelineState::Reporting))?;

        Ok((outcomes, log_location))
    }

    fn enter(&mut self, next: PipelineState) -> Result<(), CassetteError> {
        let from = self.fsm.state;
        self.fsm.transition(next).map_err(|e| e.at_stage(from))?;
        append_run_log(
            "info",
            "pipeline.stage.entered",
            json!({ "from": from.as_str(), "to": next.as_str() }),
        );
        Ok(())
    }

    /// Moves to `CleaningUp`, releases owned state once and lands on a
    /// terminal state. A cleanup failure is returned but never replaces
    /// `failure`.
    fn settle(
        &mut self,
        failure: Option<&CassetteError>,
    ) -> (PipelineState, Option<CassetteError>) {
        let to_cleanup = match failure {
            Some(error) => {
                append_run_log(
                    "error",
                    "pipeline.stage.failed",
                    json!({
                        "stage": self.fsm.state.as_str(),
                        "error": error.to_string()
                    }),
                );
                self.fsm.abort(error)
            }
            None => self.fsm.transition(PipelineState::CleaningUp),
        };
        if let Err(error) = to_cleanup {
            append_run_log(
                "error",
                "pipeline.transition_rejected",
                json!({ "error": error.to_string() }),
            );
        }

        let cleanup_error = self.cleanup.cleanup().err();
        if let Some(error) = &cleanup_error {
            append_run_log(
                "warn",
                "pipeline.cleanup.failed",
                json!({ "error": error.to_string() }),
            );
        }

        let final_state = self.fsm.finish().unwrap_or(PipelineState::Failed);
        append_run_log(
            if final_state == PipelineState::Done { "info" } else { "error" },
            "pipeline.finished",
            json!({
                "state": final_state.as_str(),
                "history": self.fsm.history.iter().map(|s| s.as_str()).collect::<Vec<_>>()
            }),
        );
        (final_state, cleanup_error)
    }
}

/// Keeps whatever the harness wrote before it died. The harness error is
/// what the run reports, so an upload failure here is only logged.
fn persist_crash_log(reporter: &Reporter<'_>, mode: RunMode, variant: ProviderVariant) {
    match reporter.upload_logs(mode, variant) {
        Ok(location) => append_run_log(
            "warn",
            "pipeline.crash_log.persisted",
            json!({ "location": location }),
        ),
        Err(error) => append_run_log(
            "error",
            "pipeline.crash_log.upload_failed",
            json!({ "error": error.to_string() }),
        ),
    }
}
