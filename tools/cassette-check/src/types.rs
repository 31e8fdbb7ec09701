use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type EnvMap = BTreeMap<String, String>;

/// Release channel of the generated provider. Selects the cassette set, the
/// source repository and the Go package under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderVariant {
    Ga,
    Beta,
}

impl ProviderVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ga => "ga",
            Self::Beta => "beta",
        }
    }

    pub fn repo_name(self) -> &'static str {
        match self {
            Self::Ga => "terraform-provider-google",
            Self::Beta => "terraform-provider-google-beta",
        }
    }

    pub fn package_dir(self) -> &'static str {
        match self {
            Self::Ga => "google",
            Self::Beta => "google-beta",
        }
    }
}

impl fmt::Display for ProviderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Replaying,
    Recording,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replaying => "replaying",
            Self::Recording => "recording",
        }
    }

    /// Value of `VCR_MODE` understood by the test harness.
    pub fn vcr_mode(self) -> &'static str {
        match self {
            Self::Replaying => "REPLAYING",
            Self::Recording => "RECORDING",
        }
    }

    pub fn log_file_name(self) -> String {
        format!("{}_test.log", self.as_str())
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
