// ── Hub discovery (fallback search) ──
//
// Finds a device's twin when its hub is not known: probe each hub tenant
// behind an application with that tenant's SAS token, in caller order,
// until one answers. A failing tenant is skipped, never escalated.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use twinview_api::{CentralClient, HubServiceClient, SharedAccessSignature, TwinProxyClient};

use crate::credentials::TokenSupplier;
use crate::error::CoreError;
use crate::model::{TenantSasToken, TwinState};

/// One scoped twin lookup against a single hub tenant.
#[async_trait]
pub trait TwinLookup: Send + Sync {
    async fn lookup(&self, device_id: &str, tenant: &TenantSasToken) -> Result<Value, CoreError>;
}

#[async_trait]
impl<T: TwinLookup + ?Sized> TwinLookup for Box<T> {
    async fn lookup(&self, device_id: &str, tenant: &TenantSasToken) -> Result<Value, CoreError> {
        (**self).lookup(device_id, tenant).await
    }
}

/// Lookups through the twin proxy endpoint.
#[async_trait]
impl TwinLookup for TwinProxyClient {
    async fn lookup(&self, device_id: &str, tenant: &TenantSasToken) -> Result<Value, CoreError> {
        Ok(self.get_twin(device_id, &tenant.token).await?)
    }
}

/// Lookups straight against each hub's service REST surface.
#[async_trait]
impl TwinLookup for HubServiceClient {
    async fn lookup(&self, device_id: &str, tenant: &TenantSasToken) -> Result<Value, CoreError> {
        let sas = SharedAccessSignature::parse(tenant.token.expose_secret())?;
        Ok(self.get_twin(device_id, &sas).await?)
    }
}

/// A twin located by [`HubDiscovery::find_twin`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredTwin {
    pub hub_name: String,
    pub twin: Value,
}

impl DiscoveredTwin {
    /// Interpret the document as a [`TwinState`].
    pub fn state(&self) -> Result<TwinState, CoreError> {
        TwinState::from_document(&self.twin)
    }
}

pub struct HubDiscovery<L> {
    lookup: L,
}

impl<L: TwinLookup> HubDiscovery<L> {
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }

    /// Probe `tenants` in order and return the first twin found.
    ///
    /// Tokens already past their expiry are skipped. Fails with
    /// [`CoreError::NotFound`] only after every tenant was tried.
    pub async fn find_twin(
        &self,
        device_id: &str,
        tenants: &[TenantSasToken],
    ) -> Result<DiscoveredTwin, CoreError> {
        let now = Utc::now();

        for tenant in tenants {
            if tenant.is_expired_at(now) {
                debug!(hub = %tenant.hub_name, "Skipping expired tenant token");
                continue;
            }

            match self.lookup.lookup(device_id, tenant).await {
                Ok(twin) => {
                    info!(device_id, hub = %tenant.hub_name, "Found device twin");
                    return Ok(DiscoveredTwin {
                        hub_name: tenant.hub_name.clone(),
                        twin,
                    });
                }
                Err(e) => {
                    debug!(device_id, hub = %tenant.hub_name, error = %e, "Tenant lookup failed, trying next");
                }
            }
        }

        Err(CoreError::NotFound {
            device_id: device_id.to_owned(),
            tenants: tenants.len(),
        })
    }
}

/// Ask the management plane for one SAS token per hub tenant, in the order
/// the service lists them.
pub async fn fetch_tenant_tokens(
    central: &CentralClient,
    supplier: &dyn TokenSupplier,
) -> Result<Vec<TenantSasToken>, CoreError> {
    let bearer = supplier.bearer_token().await?;
    let tokens = central.generate_sas_tokens(&bearer).await?;
    debug!(count = tokens.len(), "Fetched hub tenant tokens");
    Ok(tokens.into_iter().map(TenantSasToken::from).collect())
}
