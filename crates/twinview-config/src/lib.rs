//! Shared configuration for the twinview CLI and twin proxy service.
//!
//! TOML profiles, secret resolution (env + keyring + plaintext), and
//! translation into the engine's runtime config types. The CLI layers its
//! flag overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use twinview_core::{ProvisioningConfig, TlsMode, TransportConfig};

const KEYRING_SERVICE: &str = "twinview";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {what} configured for profile '{profile}'")]
    Missing { what: String, profile: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device/application profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use when none is given explicitly.
    pub fn active_profile_name(&self) -> &str {
        self.default_profile.as_deref().unwrap_or("default")
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// HTTP and handshake timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Wall-clock budget for DPS registration, seconds.
    #[serde(default = "default_provisioning_budget")]
    pub provisioning_budget: u64,

    #[serde(default)]
    pub insecure: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            timeout: default_timeout(),
            provisioning_budget: default_provisioning_budget(),
            insecure: false,
        }
    }
}

fn default_output() -> String {
    "json".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_provisioning_budget() -> u64 {
    60
}

/// A named profile: one management-plane application and/or one device.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Management-plane application subdomain.
    pub app_id: Option<String>,

    /// Management-plane base URL; overrides the one derived from `app_id`.
    pub central_url: Option<String>,

    pub device_id: Option<String>,

    /// DPS id scope.
    pub scope_id: Option<String>,

    /// Device symmetric key (plaintext, prefer keyring or env var).
    pub symmetric_key: Option<String>,

    /// Environment variable name containing the symmetric key.
    pub symmetric_key_env: Option<String>,

    /// Management-plane bearer token (plaintext, prefer keyring or env var).
    pub access_token: Option<String>,

    /// Environment variable name containing the bearer token.
    pub access_token_env: Option<String>,

    /// DPS endpoint override.
    pub dps_endpoint: Option<String>,

    /// Twin proxy base URL used for cloud twin lookups.
    pub proxy_url: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    /// Override provisioning budget.
    pub provisioning_budget: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "twinview", "twinview").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("twinview");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file path, merged over defaults and under
/// `TWINVIEW_*` environment variables (`__` separates nested keys).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TWINVIEW_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(&path, cfg)?;
    Ok(path)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Secret resolution ───────────────────────────────────────────────

/// The secrets a profile can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    SymmetricKey,
    AccessToken,
}

impl SecretKind {
    fn keyring_user(self, profile_name: &str) -> String {
        match self {
            Self::SymmetricKey => format!("{profile_name}/symmetric-key"),
            Self::AccessToken => format!("{profile_name}/access-token"),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::SymmetricKey => "symmetric key",
            Self::AccessToken => "access token",
        }
    }

    fn sources(self, profile: &Profile) -> (Option<&str>, Option<&str>) {
        match self {
            Self::SymmetricKey => (
                profile.symmetric_key_env.as_deref(),
                profile.symmetric_key.as_deref(),
            ),
            Self::AccessToken => (
                profile.access_token_env.as_deref(),
                profile.access_token.as_deref(),
            ),
        }
    }
}

/// Resolve a secret from the profile's chain: named env var, then the
/// system keyring, then plaintext in the config file.
pub fn resolve_secret(profile: &Profile, profile_name: &str, kind: SecretKind) -> Option<SecretString> {
    let (env_name, plaintext) = kind.sources(profile);
    resolve_chain(
        env_name,
        |name| std::env::var(name).ok(),
        || keyring_get(&kind.keyring_user(profile_name)),
        plaintext,
    )
}

/// The device symmetric key, if any source provides one. An absent key is
/// not an error: it can still be fetched from the management plane.
pub fn resolve_symmetric_key(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    resolve_secret(profile, profile_name, SecretKind::SymmetricKey)
}

/// The management-plane bearer token.
pub fn resolve_access_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_secret(profile, profile_name, SecretKind::AccessToken).ok_or_else(|| ConfigError::Missing {
        what: SecretKind::AccessToken.describe().into(),
        profile: profile_name.into(),
    })
}

/// Store a secret in the system keyring under the profile.
pub fn store_secret(profile_name: &str, kind: SecretKind, secret: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &kind.keyring_user(profile_name))
        .map_err(|e| ConfigError::Keyring(e.to_string()))?;
    entry
        .set_password(secret)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

fn keyring_get(user: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, user)
        .ok()
        .and_then(|entry| entry.get_password().ok())
}

fn resolve_chain(
    env_name: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl FnOnce() -> Option<String>,
    plaintext: Option<&str>,
) -> Option<SecretString> {
    // 1. Profile's *_env -> env var lookup
    if let Some(val) = env_name.and_then(&env) {
        return Some(SecretString::from(val));
    }

    // 2. System keyring
    if let Some(val) = keyring() {
        return Some(SecretString::from(val));
    }

    // 3. Plaintext in config
    plaintext
        .filter(|s| !s.is_empty())
        .map(SecretString::from)
}

// ── Translation to engine config ────────────────────────────────────

/// HTTP transport settings for a profile.
pub fn profile_transport(profile: &Profile, defaults: &Defaults) -> TransportConfig {
    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    TransportConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    }
}

/// Provisioning policy for a profile.
pub fn profile_provisioning(profile: &Profile, defaults: &Defaults) -> Result<ProvisioningConfig, ConfigError> {
    let endpoint = profile
        .dps_endpoint
        .as_deref()
        .map(|raw| parse_url("dps_endpoint", raw))
        .transpose()?;
    let budget = profile.provisioning_budget.unwrap_or(defaults.provisioning_budget);

    Ok(ProvisioningConfig {
        endpoint,
        budget: Duration::from_secs(budget),
        ..ProvisioningConfig::default()
    })
}

/// Management-plane base URL: `central_url` if set, else derived from `app_id`.
pub fn profile_central_url(profile: &Profile) -> Result<Option<Url>, ConfigError> {
    if let Some(ref raw) = profile.central_url {
        return parse_url("central_url", raw).map(Some);
    }
    match profile.app_id {
        Some(ref app_id) => parse_url("app_id", &format!("https://{app_id}.azureiotcentral.com/")).map(Some),
        None => Ok(None),
    }
}

pub fn profile_proxy_url(profile: &Profile) -> Result<Option<Url>, ConfigError> {
    profile
        .proxy_url
        .as_deref()
        .map(|raw| parse_url("proxy_url", raw))
        .transpose()
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(cfg.active_profile_name(), "default");
        assert_eq!(cfg.defaults.output, "json");
        assert_eq!(cfg.defaults.provisioning_budget, 60);
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn loads_profiles_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "lab"

[defaults]
timeout = 10

[profiles.lab]
app_id = "contoso"
device_id = "dev1"
scope_id = "0ne000ABCD"
symmetric_key_env = "LAB_DEVICE_KEY"
provisioning_budget = 5
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        let lab = &cfg.profiles["lab"];

        assert_eq!(cfg.active_profile_name(), "lab");
        assert_eq!(cfg.defaults.timeout, 10);
        assert_eq!(lab.app_id.as_deref(), Some("contoso"));
        assert_eq!(lab.symmetric_key_env.as_deref(), Some("LAB_DEVICE_KEY"));

        let provisioning = profile_provisioning(lab, &cfg.defaults).unwrap();
        assert_eq!(provisioning.budget, Duration::from_secs(5));
        assert_eq!(provisioning.initial_delay, Duration::from_secs(1));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.profiles.insert(
            "default".into(),
            Profile {
                device_id: Some("dev1".into()),
                proxy_url: Some("http://localhost:3000".into()),
                ..Profile::default()
            },
        );
        save_config_to(&path, &cfg).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profiles["default"].device_id.as_deref(), Some("dev1"));
        assert_eq!(
            profile_proxy_url(&loaded.profiles["default"]).unwrap().unwrap().as_str(),
            "http://localhost:3000/"
        );
    }

    #[test]
    fn secret_chain_prefers_env_then_keyring_then_plaintext() {
        let env = |name: &str| (name == "KEY_VAR").then(|| "from-env".to_owned());

        let s = resolve_chain(Some("KEY_VAR"), env, || Some("from-keyring".into()), Some("plain"));
        assert_eq!(s.unwrap().expose_secret(), "from-env");

        let s = resolve_chain(Some("UNSET"), env, || Some("from-keyring".into()), Some("plain"));
        assert_eq!(s.unwrap().expose_secret(), "from-keyring");

        let s = resolve_chain(None, env, || None, Some("plain"));
        assert_eq!(s.unwrap().expose_secret(), "plain");

        assert!(resolve_chain(None, env, || None, Some("")).is_none());
    }

    #[test]
    fn central_url_derives_from_app_id() {
        let profile = Profile {
            app_id: Some("contoso".into()),
            ..Profile::default()
        };
        assert_eq!(
            profile_central_url(&profile).unwrap().unwrap().as_str(),
            "https://contoso.azureiotcentral.com/"
        );

        let profile = Profile {
            app_id: Some("contoso".into()),
            central_url: Some("http://127.0.0.1:9000".into()),
            ..Profile::default()
        };
        assert_eq!(
            profile_central_url(&profile).unwrap().unwrap().as_str(),
            "http://127.0.0.1:9000/"
        );
    }

    #[test]
    fn invalid_dps_endpoint_is_validation_error() {
        let profile = Profile {
            dps_endpoint: Some("not a url".into()),
            ..Profile::default()
        };
        let err = profile_provisioning(&profile, &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "dps_endpoint"));
    }

    #[test]
    fn insecure_profile_disables_verification() {
        let profile = Profile {
            insecure: Some(true),
            timeout: Some(7),
            ..Profile::default()
        };
        let transport = profile_transport(&profile, &Defaults::default());
        assert!(matches!(transport.tls, TlsMode::DangerAcceptInvalid));
        assert_eq!(transport.timeout, Duration::from_secs(7));
    }
}
