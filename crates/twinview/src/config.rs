//! CLI configuration: thin wrapper around `twinview_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--device-id, --app-id, --symmetric-key, etc.) and builds the engine's
//! clients from the result.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use url::Url;

use twinview_api::CentralClient;
use twinview_core::{
    CoreError, CredentialResolver, ProvisioningClient, SessionConfig, SuppliedCredentials,
    TlsMode, TokenSupplier, TransportConfig,
};

use crate::cli::{GlobalOpts, ProvisionArgs};
use crate::error::CliError;

pub use twinview_config::{
    Config, Defaults, Profile, SecretKind, config_path, load_config_or_default, save_config,
    store_secret,
};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .unwrap_or_else(|| config.active_profile_name().to_owned())
}

/// Everything a command needs to build clients: the active profile plus
/// global defaults. Flags are applied on top by each accessor.
pub struct Context {
    pub profile_name: String,
    pub profile: Profile,
    pub defaults: Defaults,
}

/// Load config and select the profile.
///
/// An explicitly requested profile must exist. Otherwise a missing profile
/// is fine: flags and env vars alone can drive every command.
pub fn load_context(global: &GlobalOpts) -> Result<Context, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.profile.is_some() => {
            let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
            names.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: if names.is_empty() {
                    "(none)".into()
                } else {
                    names.join(", ")
                },
            });
        }
        None => Profile::default(),
    };

    Ok(Context {
        profile_name,
        profile,
        defaults: cfg.defaults,
    })
}

impl Context {
    fn missing(&self, what: &str, flag: &str) -> CliError {
        CliError::MissingSetting {
            what: what.into(),
            flag: flag.into(),
            profile: self.profile_name.clone(),
        }
    }

    /// Device id (flag > env > profile).
    pub fn device_id(&self, global: &GlobalOpts) -> Result<String, CliError> {
        global
            .device_id
            .clone()
            .or_else(|| self.profile.device_id.clone())
            .ok_or_else(|| self.missing("device id", "--device-id"))
    }

    pub fn transport(&self, global: &GlobalOpts) -> TransportConfig {
        let mut transport = twinview_config::profile_transport(&self.profile, &self.defaults);
        if global.insecure {
            transport.tls = TlsMode::DangerAcceptInvalid;
        }
        if let Some(secs) = global.timeout {
            transport.timeout = Duration::from_secs(secs);
        }
        transport
    }

    pub fn session_config(&self, global: &GlobalOpts) -> SessionConfig {
        let timeout = self.transport(global).timeout;
        SessionConfig {
            handshake_timeout: timeout,
            request_timeout: timeout,
            ..SessionConfig::default()
        }
    }

    /// Management-plane URL (--app-id > profile `central_url` > profile `app_id`).
    pub fn central_url(&self, global: &GlobalOpts) -> Result<Option<Url>, CliError> {
        if let Some(ref app_id) = global.app_id {
            return Ok(Some(CentralClient::app_url(app_id)?));
        }
        Ok(twinview_config::profile_central_url(&self.profile)?)
    }

    pub fn central(&self, global: &GlobalOpts) -> Result<CentralClient, CliError> {
        let url = self
            .central_url(global)?
            .ok_or_else(|| self.missing("application id", "--app-id"))?;
        Ok(CentralClient::new(url, &self.transport(global))?)
    }

    /// Bearer token supplier. Resolution failures surface only when the
    /// token is actually needed.
    pub fn token_supplier(&self, global: &GlobalOpts) -> ProfileTokenSupplier {
        let token = global.access_token.clone().map(SecretString::from).or_else(|| {
            twinview_config::resolve_secret(&self.profile, &self.profile_name, SecretKind::AccessToken)
        });
        ProfileTokenSupplier {
            token,
            profile: self.profile_name.clone(),
        }
    }

    pub fn supplied_credentials(&self, global: &GlobalOpts) -> SuppliedCredentials {
        SuppliedCredentials {
            scope_id: global
                .scope_id
                .clone()
                .or_else(|| self.profile.scope_id.clone()),
            symmetric_key: global
                .symmetric_key
                .clone()
                .map(SecretString::from)
                .or_else(|| twinview_config::resolve_symmetric_key(&self.profile, &self.profile_name)),
        }
    }

    /// Credential resolver backed by the management plane when one is configured.
    pub fn resolver(&self, global: &GlobalOpts) -> Result<CredentialResolver, CliError> {
        Ok(match self.central_url(global)? {
            Some(url) => CredentialResolver::new(CentralClient::new(url, &self.transport(global))?),
            None => CredentialResolver::offline(),
        })
    }

    pub fn provisioning(
        &self,
        global: &GlobalOpts,
        args: &ProvisionArgs,
    ) -> Result<ProvisioningClient, CliError> {
        let mut config = twinview_config::profile_provisioning(&self.profile, &self.defaults)?;
        if let Some(ref raw) = args.dps_endpoint {
            config.endpoint = Some(parse_url("dps-endpoint", raw)?);
        }
        if let Some(budget) = args.budget {
            config.budget = Duration::from_secs(budget);
        }
        Ok(ProvisioningClient::new(config, &self.transport(global))?)
    }

    /// Twin proxy URL (flag > env > profile).
    pub fn proxy_url(&self, flag: Option<&str>) -> Result<Option<Url>, CliError> {
        match flag {
            Some(raw) => parse_url("proxy-url", raw).map(Some),
            None => Ok(twinview_config::profile_proxy_url(&self.profile)?),
        }
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, CliError> {
    raw.parse().map_err(|e| CliError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

/// Hands out the bearer token resolved from flags, env, keyring, or profile.
pub struct ProfileTokenSupplier {
    token: Option<SecretString>,
    profile: String,
}

#[async_trait]
impl TokenSupplier for ProfileTokenSupplier {
    async fn bearer_token(&self) -> Result<SecretString, CoreError> {
        self.token.clone().ok_or_else(|| CoreError::Credential {
            message: format!(
                "no management-plane access token for profile '{}' (use --access-token or twinview config set-token)",
                self.profile
            ),
        })
    }
}
