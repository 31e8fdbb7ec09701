//! Required/optional configuration checks and credential lookup.
//!
//! Everything here is pure over an injected [`EnvMap`]; no process
//! environment is read.

use crate::errors::CassetteError;
use crate::logging::append_run_log;
use crate::types::EnvMap;
use serde_json::json;
use std::fmt;

pub const DEFAULT_REQUIRED: &[&str] = &[
    "COMMIT_SHA",
    "GOCACHE",
    "GOPATH",
    "GOOGLE_BILLING_ACCOUNT",
    "GOOGLE_CUST_ID",
    "GOOGLE_IDENTITY_USER",
    "GOOGLE_MASTER_BILLING_ACCOUNT",
    "GOOGLE_ORG",
    "GOOGLE_ORG_2",
    "GOOGLE_ORG_DOMAIN",
    "GOOGLE_PROJECT",
    "GOOGLE_PROJECT_NUMBER",
    "GOOGLE_REGION",
    "GOOGLE_SERVICE_ACCOUNT",
    "GOOGLE_PUBLIC_AVERTISED_PREFIX_DESCRIPTION",
    "GOOGLE_ZONE",
    "PATH",
    "SA_KEY",
];

pub const DEFAULT_OPTIONAL: &[&str] = &[
    "GOOGLE_CHRONICLE_INSTANCE_ID",
    "GOOGLE_VMWAREENGINE_PROJECT",
];

pub const DEFAULT_CREDENTIAL: &str = "GITHUB_TOKEN_DOWNSTREAMS";
pub const DEFAULT_CREDENTIAL_FALLBACK: &str = "GITHUB_TOKEN";

/// Validated configuration values, in declared order: required names first,
/// then whichever optional names were provided.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment {
    values: Vec<(String, String)>,
    missing_optional: Vec<String>,
}

impl Environment {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.values
    }

    pub fn missing_optional(&self) -> &[String] {
        &self.missing_optional
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Authentication token. Formatting never reveals the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    source: String,
    value: String,
}

impl Credential {
    pub fn new(source: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            value: value.into(),
        }
    }

    /// Name of the variable the token was read from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({}=<redacted>)", self.source)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted:{}>", self.source)
    }
}

pub struct EnvironmentValidator {
    required: Vec<String>,
    optional: Vec<String>,
}

impl EnvironmentValidator {
    pub fn new<R, O>(required: R, optional: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            optional: optional.into_iter().map(Into::into).collect(),
        }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn optional(&self) -> &[String] {
        &self.optional
    }

    pub fn validate(&self, source: &EnvMap) -> Result<Environment, CassetteError> {
        let mut env = Environment::default();
        for name in &self.required {
            let Some(value) = source.get(name) else {
                append_run_log(
                    "error",
                    "environment.required.missing",
                    json!({ "name": name, "required_count": self.required.len() }),
                );
                return Err(CassetteError::MissingConfiguration {
                    name: name.clone(),
                    listing: render_required_list(&self.required),
                });
            };
            env.values.push((name.clone(), value.clone()));
        }

        for name in &self.optional {
            match source.get(name) {
                Some(value) => env.values.push((name.clone(), value.clone())),
                None => {
                    append_run_log(
                        "warn",
                        "environment.optional.missing",
                        json!({ "name": name }),
                    );
                    env.missing_optional.push(name.clone());
                }
            }
        }

        append_run_log(
            "info",
            "environment.validated",
            json!({
                "provided": env.values.len(),
                "missing_optional": env.missing_optional
            }),
        );
        Ok(env)
    }
}

/// Returns the scoped token when set, otherwise the generic one. The
/// fallback is only consulted when the primary name is absent.
pub fn resolve_credential(primary: &str, fallback: &str, env: &EnvMap) -> Option<Credential> {
    if let Some(value) = env.get(primary) {
        return Some(Credential::new(primary, value.clone()));
    }
    env.get(fallback)
        .map(|value| Credential::new(fallback, value.clone()))
}

pub fn require_credential(
    primary: &str,
    fallback: &str,
    env: &EnvMap,
) -> Result<Credential, CassetteError> {
    let credential = resolve_credential(primary, fallback, env).ok_or_else(|| {
        CassetteError::MissingCredential {
            primary: primary.to_string(),
            fallback: fallback.to_string(),
        }
    })?;
    append_run_log(
        "info",
        "environment.credential.resolved",
        json!({ "source": credential.source() }),
    );
    Ok(credential)
}

pub fn render_required_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("\t{:2}. {}\n", i + 1, name.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reports_first_missing_required_name_in_declared_order() {
        let validator = EnvironmentValidator::new(["A", "B", "C"], Vec::<String>::new());
        let err = validator
            .validate(&env(&[("A", "1")]))
            .expect_err("B and C missing");
        match err {
            CassetteError::MissingConfiguration { name, listing } => {
                assert_eq!(name, "B");
                assert!(listing.contains(" 1. A"));
                assert!(listing.contains(" 3. C"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn succeeds_when_required_is_subset_of_provided() {
        let validator = EnvironmentValidator::new(["A", "B"], ["OPT"]);
        let validated = validator
            .validate(&env(&[("B", "2"), ("A", "1"), ("EXTRA", "x")]))
            .expect("valid");
        assert_eq!(validated.get("A"), Some("1"));
        assert_eq!(validated.get("EXTRA"), None);
        assert_eq!(validated.entries()[0].0, "A");
        assert_eq!(validated.missing_optional(), ["OPT".to_string()]);
    }

    #[test]
    fn provided_optional_values_are_kept() {
        let validator = EnvironmentValidator::new(["A"], ["OPT"]);
        let validated = validator
            .validate(&env(&[("A", "1"), ("OPT", "o")]))
            .expect("valid");
        assert_eq!(validated.get("OPT"), Some("o"));
        assert!(validated.missing_optional().is_empty());
        assert_eq!(validated.len(), 2);
    }

    #[test]
    fn credential_prefers_scoped_token_unconditionally() {
        let found = resolve_credential(
            "GITHUB_TOKEN_DOWNSTREAMS",
            "GITHUB_TOKEN",
            &env(&[("GITHUB_TOKEN_DOWNSTREAMS", "scoped"), ("GITHUB_TOKEN", "generic")]),
        )
        .expect("found");
        assert_eq!(found.expose(), "scoped");
        assert_eq!(found.source(), "GITHUB_TOKEN_DOWNSTREAMS");
    }

    #[test]
    fn credential_falls_back_then_fails() {
        let fallback = resolve_credential("P", "F", &env(&[("F", "generic")])).expect("fallback");
        assert_eq!(fallback.expose(), "generic");

        let err = require_credential("P", "F", &env(&[])).expect_err("both absent");
        assert!(matches!(err, CassetteError::MissingCredential { .. }));
        assert_eq!(err.to_string(), "did not provide P or F environment variables");
    }

    #[test]
    fn credential_formatting_never_leaks_value() {
        let credential = Credential::new("GITHUB_TOKEN", "ghp_supersecret");
        assert!(!format!("{credential:?}").contains("ghp_supersecret"));
        assert!(!credential.to_string().contains("ghp_supersecret"));
    }

    #[test]
    fn required_list_is_numbered() {
        let listing = render_required_list(&["COMMIT_SHA", "GOPATH"]);
        assert_eq!(listing, "\t 1. COMMIT_SHA\n\t 2. GOPATH\n");
    }
}
