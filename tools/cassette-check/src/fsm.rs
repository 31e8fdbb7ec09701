use crate::errors::CassetteError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Validating,
    Fetching,
    Cloning,
    Replaying,
    Reporting,
    CleaningUp,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Fetching => "fetching",
            Self::Cloning => "cloning",
            Self::Replaying => "replaying",
            Self::Reporting => "reporting",
            Self::CleaningUp => "cleaning_up",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Phrase used in stage-identifying error messages.
    pub fn activity(self) -> &'static str {
        match self {
            Self::Validating => "validating environment",
            Self::Fetching => "fetching cassettes",
            Self::Cloning => "cloning provider",
            Self::Replaying => "running VCR",
            Self::Reporting => "uploading logs",
            Self::CleaningUp => "cleaning up vcr tester",
            Self::Done => "finishing run",
            Self::Failed => "failing run",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn validate_transition(from: PipelineState, to: PipelineState) -> Result<(), CassetteError> {
    use PipelineState as S;

    let allowed = match from {
        S::Validating => matches!(to, S::Fetching | S::CleaningUp),
        S::Fetching => matches!(to, S::Cloning | S::CleaningUp),
        S::Cloning => matches!(to, S::Replaying | S::CleaningUp),
        S::Replaying => matches!(to, S::Reporting | S::CleaningUp),
        S::Reporting => matches!(to, S::CleaningUp),
        S::CleaningUp => matches!(to, S::Done | S::Failed),
        S::Done | S::Failed => false,
    };

    if !allowed {
        return Err(CassetteError::InvalidConfig(format!(
            "illegal transition: {:?} -> {:?}",
            from, to
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub history: Vec<PipelineState>,
    pub failure_reason: Option<String>,
}

impl Default for PipelineSnapshot {
    fn default() -> Self {
        Self {
            state: PipelineState::Validating,
            history: vec![PipelineState::Validating],
            failure_reason: None,
        }
    }
}

impl PipelineSnapshot {
    pub fn transition(&mut self, next: PipelineState) -> Result<(), CassetteError> {
        validate_transition(self.state, next)?;
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Collapses a working stage straight to cleanup, remembering why.
    pub fn abort(&mut self, reason: &CassetteError) -> Result<(), CassetteError> {
        self.failure_reason = Some(reason.to_string());
        if self.state == PipelineState::CleaningUp {
            return Ok(());
        }
        self.transition(PipelineState::CleaningUp)
    }

    pub fn finish(&mut self) -> Result<PipelineState, CassetteError> {
        let terminal = if self.failure_reason.is_some() {
            PipelineState::Failed
        } else {
            PipelineState::Done
        };
        self.transition(terminal)?;
        Ok(terminal)
    }
}
