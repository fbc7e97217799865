// ── Credential resolver ──
//
// Produces the DeviceIdentity a device provisions with: from values the
// caller already has, or from the management plane's credentials endpoint
// using a bearer token obtained on demand.

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{debug, info};
use twinview_api::{CentralClient, TransportConfig};

use crate::error::CoreError;
use crate::model::DeviceIdentity;

/// Supplies management-plane bearer tokens on demand.
///
/// The sign-in flow lives outside the engine; it is injected through this
/// trait.
#[async_trait]
pub trait TokenSupplier: Send + Sync {
    async fn bearer_token(&self) -> Result<SecretString, CoreError>;
}

/// A supplier that always hands out the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenSupplier {
    token: SecretString,
}

impl StaticTokenSupplier {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenSupplier for StaticTokenSupplier {
    async fn bearer_token(&self) -> Result<SecretString, CoreError> {
        Ok(self.token.clone())
    }
}

/// Values the caller may already hold.
#[derive(Debug, Clone, Default)]
pub struct SuppliedCredentials {
    pub scope_id: Option<String>,
    pub symmetric_key: Option<SecretString>,
}

impl SuppliedCredentials {
    fn complete(&self) -> Option<(&str, &SecretString)> {
        match (self.scope_id.as_deref(), self.symmetric_key.as_ref()) {
            (Some(scope), Some(key)) => Some((scope, key)),
            _ => None,
        }
    }
}

pub struct CredentialResolver {
    central: Option<CentralClient>,
}

impl CredentialResolver {
    pub fn new(central: CentralClient) -> Self {
        Self {
            central: Some(central),
        }
    }

    /// Resolver for the management-plane application `app_id`.
    pub fn for_app(app_id: &str, transport: &TransportConfig) -> Result<Self, CoreError> {
        let url = CentralClient::app_url(app_id)?;
        Ok(Self::new(CentralClient::new(url, transport)?))
    }

    /// Resolver that only accepts caller-supplied credentials.
    pub fn offline() -> Self {
        Self { central: None }
    }

    /// Build the identity for `device_id`.
    ///
    /// When both scope id and key are supplied they are used unchanged and
    /// no request is made. Otherwise the management plane fills in whatever
    /// is missing; a field absent from both fails with
    /// [`CoreError::Credential`].
    pub async fn resolve(
        &self,
        device_id: &str,
        supplied: &SuppliedCredentials,
        supplier: &dyn TokenSupplier,
    ) -> Result<DeviceIdentity, CoreError> {
        if let Some((scope_id, key)) = supplied.complete() {
            debug!(device_id, "Using caller-supplied credentials");
            return DeviceIdentity::new(device_id, scope_id, key.clone());
        }

        let Some(ref central) = self.central else {
            return Err(CoreError::Credential {
                message: "scope id and symmetric key are required when no management-plane application is configured".into(),
            });
        };

        info!(device_id, "Fetching device credentials from the management plane");
        let bearer = supplier.bearer_token().await?;
        let fetched = central.device_credentials(device_id, &bearer).await?;

        let scope_id = supplied
            .scope_id
            .clone()
            .or_else(|| fetched.id_scope.clone())
            .ok_or_else(|| missing("scope id"))?;
        let key = supplied
            .symmetric_key
            .clone()
            .or_else(|| fetched.primary_key().cloned())
            .ok_or_else(|| missing("symmetric key"))?;

        DeviceIdentity::new(device_id, scope_id, key)
    }
}

fn missing(field: &str) -> CoreError {
    CoreError::Credential {
        message: format!("management plane returned no {field} for the device"),
    }
}
