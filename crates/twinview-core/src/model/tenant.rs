// ── Hub tenant tokens ──

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use twinview_api::{HubTenantToken, SharedAccessSignature};

/// A SAS token scoped to one hub tenant, used by the fallback search.
///
/// Ephemeral: produced by the management plane on demand, never persisted.
#[derive(Debug, Clone)]
pub struct TenantSasToken {
    pub hub_name: String,
    pub token: SecretString,
    pub expiry: Option<DateTime<Utc>>,
}

impl TenantSasToken {
    pub fn new(hub_name: impl Into<String>, token: SecretString) -> Self {
        let expiry = SharedAccessSignature::parse(token.expose_secret())
            .ok()
            .and_then(|sas| sas.expires_at());
        Self {
            hub_name: hub_name.into(),
            token,
            expiry,
        }
    }

    /// Whether the token is known to have expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

impl From<HubTenantToken> for TenantSasToken {
    fn from(token: HubTenantToken) -> Self {
        Self::new(token.hub_name, token.sas_token)
    }
}
