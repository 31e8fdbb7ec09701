use crate::fsm::PipelineState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CassetteError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("did not provide {name} environment variable\nrequired environment variables:\n{listing}")]
    MissingConfiguration { name: String, listing: String },
    #[error("did not provide {primary} or {fallback} environment variables")]
    MissingCredential { primary: String, fallback: String },
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("fixtures unavailable: {0}")]
    FixtureUnavailable(String),
    #[error("harness failure: {0}")]
    HarnessFailure(String),
    #[error("log persistence failure: {0}")]
    LogPersistenceFailure(String),
    #[error("cleanup failure: {0}")]
    CleanupFailure(String),
    #[error("error {}: {source}", .stage.activity())]
    Stage {
        stage: PipelineState,
        source: Box<CassetteError>,
    },
}

impl CassetteError {
    /// Wraps `self` with the pipeline stage it escaped from. Already wrapped
    /// errors keep their original stage.
    pub fn at_stage(self, stage: PipelineState) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with stage wrapping removed.
    pub fn root(&self) -> &CassetteError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn stage(&self) -> Option<PipelineState> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Cleanup failures are informational; everything else ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.root(), Self::CleanupFailure(_))
    }
}
