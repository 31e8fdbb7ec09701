use crate::cassettes::DEFAULT_BRANCH;
use crate::environment::{
    DEFAULT_CREDENTIAL, DEFAULT_CREDENTIAL_FALLBACK, DEFAULT_OPTIONAL, DEFAULT_REQUIRED,
};
use crate::errors::CassetteError;
use crate::executor::HarnessSettings;
use crate::logging::DEFAULT_DISK_BUDGET_BYTES;
use crate::runtime::FileSystem;
use crate::types::{EnvMap, ProviderVariant};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub variant: Option<ProviderVariant>,
    pub fixture_branch: Option<String>,
    pub filter: Option<String>,
    pub root: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub run: RunConfig,
    pub environment: EnvironmentConfig,
    pub workspace: WorkspaceConfig,
    pub source: SourceConfig,
    pub cassettes: CassettesConfig,
    pub harness: HarnessConfig,
    pub logs: LogsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    pub variant: ProviderVariant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub credential: String,
    pub credential_fallback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CassettesConfig {
    pub bucket: String,
    pub branch: String,
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    pub program: String,
    pub parallelism: u32,
    pub timeout: String,
    pub test_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogsConfig {
    pub bucket: String,
    pub directory: Option<PathBuf>,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let harness = HarnessSettings::default();
        Self {
            run: RunConfig {
                variant: ProviderVariant::Beta,
            },
            environment: EnvironmentConfig {
                required: DEFAULT_REQUIRED.iter().map(|s| s.to_string()).collect(),
                optional: DEFAULT_OPTIONAL.iter().map(|s| s.to_string()).collect(),
                credential: DEFAULT_CREDENTIAL.to_string(),
                credential_fallback: DEFAULT_CREDENTIAL_FALLBACK.to_string(),
            },
            workspace: WorkspaceConfig { root: None },
            source: SourceConfig {
                owner: "modular-magician".to_string(),
            },
            cassettes: CassettesConfig {
                bucket: "ci-vcr-cassettes".to_string(),
                branch: DEFAULT_BRANCH.to_string(),
                filter: String::new(),
            },
            harness: HarnessConfig {
                program: harness.program,
                parallelism: harness.parallelism,
                timeout: harness.timeout,
                test_pattern: harness.test_pattern,
            },
            logs: LogsConfig {
                bucket: "vcr-check-cassettes".to_string(),
                directory: None,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

impl HarnessConfig {
    pub fn settings(&self) -> HarnessSettings {
        HarnessSettings {
            program: self.program.clone(),
            parallelism: self.parallelism,
            timeout: self.timeout.clone(),
            test_pattern: self.test_pattern.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    run: Option<PartialRunConfig>,
    environment: Option<PartialEnvironmentConfig>,
    workspace: Option<WorkspaceConfig>,
    source: Option<PartialSourceConfig>,
    cassettes: Option<PartialCassettesConfig>,
    harness: Option<PartialHarnessConfig>,
    logs: Option<PartialLogsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRunConfig {
    variant: Option<ProviderVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialEnvironmentConfig {
    required: Option<Vec<String>>,
    optional: Option<Vec<String>>,
    credential: Option<String>,
    credential_fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSourceConfig {
    owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCassettesConfig {
    bucket: Option<String>,
    branch: Option<String>,
    filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialHarnessConfig {
    program: Option<String>,
    parallelism: Option<u32>,
    timeout: Option<String>,
    test_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLogsConfig {
    bucket: Option<String>,
    directory: Option<PathBuf>,
    budget_bytes: Option<u64>,
}

/// Defaults, then the toml file named by `--config`, then CLI flags. Relative
/// paths are resolved against `process_cwd`. Reads nothing but the config
/// file.
pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, CassetteError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(&absolutize_path(process_cwd, path))?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| CassetteError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);

    cfg.workspace.root = cfg
        .workspace
        .root
        .as_deref()
        .map(|root| absolutize_path(process_cwd, root));
    cfg.logs.directory = cfg
        .logs
        .directory
        .as_deref()
        .map(|dir| absolutize_path(process_cwd, dir));

    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(run) = partial.run {
        if let Some(variant) = run.variant {
            cfg.run.variant = variant;
        }
    }

    if let Some(environment) = partial.environment {
        if let Some(required) = environment.required {
            cfg.environment.required = required;
        }
        if let Some(optional) = environment.optional {
            cfg.environment.optional = optional;
        }
        if let Some(value) = environment.credential {
            cfg.environment.credential = value;
        }
        if let Some(value) = environment.credential_fallback {
            cfg.environment.credential_fallback = value;
        }
    }

    if let Some(workspace) = partial.workspace {
        cfg.workspace.root = workspace.root;
    }

    if let Some(source) = partial.source {
        if let Some(owner) = source.owner {
            cfg.source.owner = owner;
        }
    }

    if let Some(cassettes) = partial.cassettes {
        if let Some(value) = cassettes.bucket {
            cfg.cassettes.bucket = value;
        }
        if let Some(value) = cassettes.branch {
            cfg.cassettes.branch = value;
        }
        if let Some(value) = cassettes.filter {
            cfg.cassettes.filter = value;
        }
    }

    if let Some(harness) = partial.harness {
        if let Some(value) = harness.program {
            cfg.harness.program = value;
        }
        if let Some(value) = harness.parallelism {
            cfg.harness.parallelism = value;
        }
        if let Some(value) = harness.timeout {
            cfg.harness.timeout = value;
        }
        if let Some(value) = harness.test_pattern {
            cfg.harness.test_pattern = value;
        }
    }

    if let Some(logs) = partial.logs {
        if let Some(value) = logs.bucket {
            cfg.logs.bucket = value;
        }
        if let Some(value) = logs.directory {
            cfg.logs.directory = Some(value);
        }
        if let Some(value) = logs.budget_bytes {
            cfg.logs.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(variant) = overrides.variant {
        cfg.run.variant = variant;
    }
    if let Some(branch) = &overrides.fixture_branch {
        cfg.cassettes.branch = branch.clone();
    }
    if let Some(filter) = &overrides.filter {
        cfg.cassettes.filter = filter.clone();
    }
    if let Some(root) = &overrides.root {
        cfg.workspace.root = Some(root.clone());
    }
    if let Some(dir) = &overrides.log_dir {
        cfg.logs.directory = Some(dir.clone());
    }
}

/// Workspace root: explicit config first, then `$GOPATH`.
pub fn resolve_root(cfg: &AppConfig, env: &EnvMap) -> Option<PathBuf> {
    cfg.workspace
        .root
        .clone()
        .or_else(|| env.get("GOPATH").map(PathBuf::from))
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), CassetteError> {
    if cfg.environment.required.is_empty() {
        return Err(CassetteError::InvalidConfig(
            "environment.required must name at least one variable".to_string(),
        ));
    }

    if cfg.environment.credential.trim().is_empty()
        || cfg.environment.credential_fallback.trim().is_empty()
    {
        return Err(CassetteError::InvalidConfig(
            "environment.credential and environment.credential_fallback must be set".to_string(),
        ));
    }

    if cfg.harness.parallelism == 0 {
        return Err(CassetteError::InvalidConfig(
            "harness.parallelism must be greater than zero".to_string(),
        ));
    }

    if cfg.harness.program.trim().is_empty() {
        return Err(CassetteError::InvalidConfig(
            "harness.program must not be empty".to_string(),
        ));
    }

    if cfg.cassettes.bucket.trim().is_empty() || cfg.logs.bucket.trim().is_empty() {
        return Err(CassetteError::InvalidConfig(
            "cassettes.bucket and logs.bucket must not be empty".to_string(),
        ));
    }

    if cfg.cassettes.branch.trim().is_empty() {
        return Err(CassetteError::InvalidConfig(
            "cassettes.branch must not be empty".to_string(),
        ));
    }

    Ok(())
}
