use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use consign_retry::{DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL, PollPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::secrets::SecretDecryptor;
use crate::source::ConfigSource;

/// Which credential and endpoint set a carrier uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    #[default]
    Sandbox,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Sandbox => "sandbox",
        }
    }

    /// Suffix appended to legacy keys (`GLS_GUID_TEST`).
    pub fn legacy_suffix(&self) -> &'static str {
        match self {
            Environment::Production => "",
            Environment::Sandbox => "_TEST",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" | "live" => Ok(Environment::Production),
            "sandbox" | "test" | "dev" | "staging" => Ok(Environment::Sandbox),
            other => Err(format!(
                "unknown environment '{other}' (expected production or sandbox)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error(
        "missing required setting `{field}` for {carrier} ({environment}); tried {}",
        .tried.join(", ")
    )]
    Missing {
        carrier: String,
        field: String,
        environment: Environment,
        tried: Vec<String>,
    },
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("failed to decrypt `{field}` for {carrier}: {reason}")]
    Decrypt {
        carrier: String,
        field: String,
        reason: String,
    },
}

/// Configuration handle for one carrier.
///
/// Cheap to clone; adapters keep one and open a [`SettingsView`] per call so
/// the environment flag is read once per attempt.
#[derive(Clone)]
pub struct CarrierSettings {
    code: String,
    source: Arc<dyn ConfigSource>,
    secrets: Arc<dyn SecretDecryptor>,
}

impl fmt::Debug for CarrierSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierSettings")
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

impl CarrierSettings {
    pub fn new(
        code: impl AsRef<str>,
        source: Arc<dyn ConfigSource>,
        secrets: Arc<dyn SecretDecryptor>,
    ) -> Self {
        Self {
            code: code.as_ref().trim().to_ascii_uppercase(),
            source,
            secrets,
        }
    }

    /// Uppercase carrier code used for legacy keys.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Read the environment flag: `carriers.<code>.environment`, then
    /// `<CODE>_ENVIRONMENT`, defaulting to sandbox.
    pub fn environment(&self) -> Result<Environment, SettingsError> {
        let keys = [
            format!("carriers.{}.environment", self.namespace()),
            format!("{}_ENVIRONMENT", self.code),
        ];

        for key in keys {
            if let Some(value) = self.lookup(&key) {
                return value.parse().map_err(|reason| SettingsError::Invalid {
                    key,
                    value,
                    reason,
                });
            }
        }

        Ok(Environment::default())
    }

    /// Resolve the environment and return a view bound to it.
    pub fn view(&self) -> Result<SettingsView<'_>, SettingsError> {
        Ok(self.view_for(self.environment()?))
    }

    pub fn view_for(&self, environment: Environment) -> SettingsView<'_> {
        SettingsView {
            settings: self,
            environment,
        }
    }

    fn namespace(&self) -> String {
        self.code.to_ascii_lowercase()
    }

    fn lookup(&self, key: &str) -> Option<String> {
        self.source
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// [`CarrierSettings`] with the environment fixed.
#[derive(Debug, Clone, Copy)]
pub struct SettingsView<'a> {
    settings: &'a CarrierSettings,
    environment: Environment,
}

impl SettingsView<'_> {
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Keys tried for `field`, in lookup order.
    pub fn candidate_keys(&self, field: &str) -> [String; 3] {
        let ns = self.settings.namespace();
        [
            format!("carriers.{ns}.{}.{field}", self.environment),
            format!("carriers.{ns}.{field}"),
            format!(
                "{}_{}{}",
                self.settings.code,
                field.to_ascii_uppercase(),
                self.environment.legacy_suffix()
            ),
        ]
    }

    fn resolve(&self, field: &str) -> Option<(String, String)> {
        for key in self.candidate_keys(field) {
            if let Some(value) = self.settings.lookup(&key) {
                debug!(
                    carrier = %self.settings.code,
                    environment = %self.environment,
                    field,
                    key = %key,
                    "resolved carrier setting"
                );
                return Some((key, value));
            }
        }
        None
    }

    fn missing(&self, field: &str) -> SettingsError {
        SettingsError::Missing {
            carrier: self.settings.code.clone(),
            field: field.to_string(),
            environment: self.environment,
            tried: self.candidate_keys(field).to_vec(),
        }
    }

    pub fn get(&self, field: &str) -> Option<String> {
        self.resolve(field).map(|(_, value)| value)
    }

    pub fn get_or(&self, field: &str, default: &str) -> String {
        self.get(field).unwrap_or_else(|| default.to_string())
    }

    pub fn require(&self, field: &str) -> Result<String, SettingsError> {
        self.get(field).ok_or_else(|| self.missing(field))
    }

    /// Like [`get`](Self::get), but the stored value is passed through the
    /// secret decryptor.
    pub fn get_secret(&self, field: &str) -> Result<Option<String>, SettingsError> {
        let Some(stored) = self.get(field) else {
            return Ok(None);
        };

        let plain = self
            .settings
            .secrets
            .decrypt(&stored)
            .map_err(|e| SettingsError::Decrypt {
                carrier: self.settings.code.clone(),
                field: field.to_string(),
                reason: format!("{e:#}"),
            })?;

        Ok(Some(plain).filter(|v| !v.trim().is_empty()))
    }

    pub fn require_secret(&self, field: &str) -> Result<String, SettingsError> {
        self.get_secret(field)?.ok_or_else(|| self.missing(field))
    }

    /// Parse an optional value with [`FromStr`].
    pub fn parse<T>(&self, field: &str) -> Result<Option<T>, SettingsError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.resolve(field)
            .map(|(key, value)| {
                value.parse().map_err(|e: T::Err| SettingsError::Invalid {
                    key,
                    value,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Parse an optional humantime duration (`250ms`, `30s`).
    pub fn duration(&self, field: &str) -> Result<Option<Duration>, SettingsError> {
        self.resolve(field)
            .map(|(key, value)| {
                humantime::parse_duration(&value).map_err(|e| SettingsError::Invalid {
                    key,
                    value,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Label poll policy from `label_poll_interval` and `label_poll_attempts`.
    pub fn poll_policy(&self) -> Result<PollPolicy, SettingsError> {
        let interval = self
            .duration("label_poll_interval")?
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let attempts = self
            .parse::<u32>("label_poll_attempts")?
            .unwrap_or(DEFAULT_POLL_ATTEMPTS);
        Ok(PollPolicy::new(interval, attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{PassphraseDecryptor, PlainSecrets};
    use crate::source::{EnvSource, Layered, MapSource, TomlSource};
    use proptest::prelude::*;
    use serial_test::serial;

    fn settings(code: &str, source: MapSource) -> CarrierSettings {
        CarrierSettings::new(code, Arc::new(source), Arc::new(PlainSecrets))
    }

    #[test]
    fn environment_defaults_to_sandbox() {
        let s = settings("gls", MapSource::new());
        assert_eq!(s.environment().expect("env"), Environment::Sandbox);
    }

    #[test]
    fn environment_prefers_namespaced_key() {
        let s = settings(
            "gls",
            MapSource::new()
                .with("carriers.gls.environment", "live")
                .with("GLS_ENVIRONMENT", "test"),
        );
        assert_eq!(s.environment().expect("env"), Environment::Production);
    }

    #[test]
    fn environment_falls_back_to_legacy_key() {
        let s = settings(
            "dhl",
            MapSource::new()
                .with("carriers.dhl.environment", "  ")
                .with("DHL_ENVIRONMENT", "prod"),
        );
        assert_eq!(s.environment().expect("env"), Environment::Production);
    }

    #[test]
    fn invalid_environment_is_reported() {
        let s = settings("ctt", MapSource::new().with("CTT_ENVIRONMENT", "mars"));
        let err = s.environment().expect_err("invalid");
        assert!(matches!(
            err,
            SettingsError::Invalid { ref key, ref value, .. }
                if key == "CTT_ENVIRONMENT" && value == "mars"
        ));
    }

    #[test]
    fn candidate_keys_follow_lookup_order() {
        let s = settings("gls", MapSource::new());
        assert_eq!(
            s.view_for(Environment::Sandbox).candidate_keys("guid"),
            [
                "carriers.gls.sandbox.guid".to_string(),
                "carriers.gls.guid".to_string(),
                "GLS_GUID_TEST".to_string(),
            ]
        );
        assert_eq!(
            s.view_for(Environment::Production).candidate_keys("client_id")[2],
            "GLS_CLIENT_ID"
        );
    }

    #[test]
    fn environment_specific_key_wins() {
        let s = settings(
            "gls",
            MapSource::new()
                .with("carriers.gls.production.guid", "env-specific")
                .with("carriers.gls.guid", "shared")
                .with("GLS_GUID", "legacy"),
        );
        let view = s.view_for(Environment::Production);
        assert_eq!(view.require("guid").expect("guid"), "env-specific");
    }

    #[test]
    fn shared_key_beats_legacy() {
        let s = settings(
            "gls",
            MapSource::new()
                .with("carriers.gls.guid", "shared")
                .with("GLS_GUID", "legacy"),
        );
        let view = s.view_for(Environment::Production);
        assert_eq!(view.require("guid").expect("guid"), "shared");
    }

    #[test]
    fn blank_values_fall_through() {
        let s = settings(
            "gls",
            MapSource::new()
                .with("carriers.gls.sandbox.guid", "")
                .with("carriers.gls.guid", "   ")
                .with("GLS_GUID_TEST", "legacy-test"),
        );
        let view = s.view().expect("view");
        assert_eq!(view.environment(), Environment::Sandbox);
        assert_eq!(view.require("guid").expect("guid"), "legacy-test");
    }

    #[test]
    fn sandbox_never_reads_production_legacy_key() {
        let s = settings("gls", MapSource::new().with("GLS_GUID", "prod-only"));
        let view = s.view().expect("view");
        assert_eq!(view.get("guid"), None);
    }

    #[test]
    fn missing_value_lists_tried_keys() {
        let s = settings("cex", MapSource::new());
        let err = s.view().expect("view").require("url").expect_err("missing");
        assert_eq!(
            err.to_string(),
            "missing required setting `url` for CEX (sandbox); tried \
             carriers.cex.sandbox.url, carriers.cex.url, CEX_URL_TEST"
        );
    }

    #[test]
    fn secrets_are_decrypted_on_read() {
        let decryptor = PassphraseDecryptor::new("deploy");
        let sealed = decryptor.cipher().seal("s3cret").expect("seal");
        let s = CarrierSettings::new(
            "ctt",
            Arc::new(MapSource::new().with("carriers.ctt.client_secret", sealed)),
            Arc::new(decryptor),
        );
        let view = s.view().expect("view");
        assert_eq!(view.require_secret("client_secret").expect("secret"), "s3cret");
    }

    #[test]
    fn undecryptable_secret_is_reported() {
        let sealed = PassphraseDecryptor::new("right")
            .cipher()
            .seal("s3cret")
            .expect("seal");
        let s = CarrierSettings::new(
            "ctt",
            Arc::new(MapSource::new().with("carriers.ctt.client_secret", sealed)),
            Arc::new(PassphraseDecryptor::new("wrong")),
        );
        let err = s
            .view()
            .expect("view")
            .require_secret("client_secret")
            .expect_err("decrypt");
        assert!(matches!(err, SettingsError::Decrypt { ref field, .. } if field == "client_secret"));
    }

    #[test]
    fn missing_secret_is_missing() {
        let s = settings("dhl", MapSource::new());
        let err = s.view().expect("view").require_secret("key").expect_err("missing");
        assert!(matches!(err, SettingsError::Missing { .. }));
    }

    #[test]
    fn durations_and_numbers_parse() {
        let s = settings(
            "ctt",
            MapSource::new()
                .with("carriers.ctt.timeout", "45s")
                .with("carriers.ctt.domestic_width", "5"),
        );
        let view = s.view().expect("view");
        assert_eq!(
            view.duration("timeout").expect("duration"),
            Some(Duration::from_secs(45))
        );
        assert_eq!(view.parse::<usize>("domestic_width").expect("parse"), Some(5));
        assert_eq!(view.duration("absent").expect("absent"), None);
    }

    #[test]
    fn bad_duration_is_invalid() {
        let s = settings("ctt", MapSource::new().with("carriers.ctt.timeout", "soon"));
        let err = s.view().expect("view").duration("timeout").expect_err("invalid");
        assert!(matches!(err, SettingsError::Invalid { ref key, .. } if key == "carriers.ctt.timeout"));
    }

    #[test]
    fn poll_policy_defaults() {
        let s = settings("ctt", MapSource::new());
        let policy = s.view().expect("view").poll_policy().expect("policy");
        assert_eq!(policy, PollPolicy::default());
    }

    #[test]
    fn poll_policy_overrides() {
        let s = settings(
            "ctt",
            MapSource::new()
                .with("carriers.ctt.label_poll_interval", "50ms")
                .with("CTT_LABEL_POLL_ATTEMPTS_TEST", "3"),
        );
        let policy = s.view().expect("view").poll_policy().expect("policy");
        assert_eq!(policy.interval, Duration::from_millis(50));
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn layered_env_overrides_file() {
        let file: TomlSource = "[carriers.gls]\nenvironment = \"production\"\nurl = \"https://file\"\n"
            .parse()
            .expect("toml");
        temp_env::with_var("CONSIGN_CARRIERS_GLS_URL", Some("https://env"), || {
            let source = Layered::new().with(EnvSource::new("CONSIGN")).with(file.clone());
            let s = CarrierSettings::new("GLS", Arc::new(source), Arc::new(PlainSecrets));
            let view = s.view().expect("view");
            assert_eq!(view.environment(), Environment::Production);
            assert_eq!(view.require("url").expect("url"), "https://env");
        });
    }

    #[test]
    #[serial]
    fn legacy_environment_variables_work_without_prefix() {
        temp_env::with_vars(
            [
                ("GLS_ENVIRONMENT", Some("sandbox")),
                ("GLS_GUID_TEST", Some("legacy-env-guid")),
            ],
            || {
                let s = CarrierSettings::new(
                    "gls",
                    Arc::new(EnvSource::default()),
                    Arc::new(PlainSecrets),
                );
                assert_eq!(
                    s.view().expect("view").require("guid").expect("guid"),
                    "legacy-env-guid"
                );
            },
        );
    }

    proptest! {
        #[test]
        fn environment_aliases_are_case_insensitive(
            alias in prop::sample::select(vec!["production", "prod", "live", "sandbox", "test", "dev", "staging"]),
            upper in any::<bool>(),
        ) {
            let raw = if upper { alias.to_ascii_uppercase() } else { alias.to_string() };
            let parsed: Environment = raw.parse().expect("alias");
            let expected = if ["production", "prod", "live"].contains(&alias) {
                Environment::Production
            } else {
                Environment::Sandbox
            };
            prop_assert_eq!(parsed, expected);
        }

        #[test]
        fn first_non_blank_tier_wins(
            env_specific in prop::option::of("[a-z]{0,3}"),
            shared in prop::option::of("[a-z]{0,3}"),
            legacy in prop::option::of("[a-z]{0,3}"),
        ) {
            let mut source = MapSource::new();
            if let Some(v) = &env_specific { source.insert("carriers.dhl.production.url", v.clone()); }
            if let Some(v) = &shared { source.insert("carriers.dhl.url", v.clone()); }
            if let Some(v) = &legacy { source.insert("DHL_URL", v.clone()); }

            let s = settings("dhl", source);
            let expected = [env_specific, shared, legacy]
                .into_iter()
                .flatten()
                .find(|v| !v.is_empty());
            prop_assert_eq!(s.view_for(Environment::Production).get("url"), expected);
        }
    }
}
