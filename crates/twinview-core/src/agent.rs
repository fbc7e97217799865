// ── Device agent ──
//
// The end-to-end device workflow: resolve credentials, provision, connect
// the hub session, and start synchronizing the twin. Holds at most one
// session; connecting again tears the previous one down first.

use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::SessionConfig;
use crate::credentials::{CredentialResolver, SuppliedCredentials, TokenSupplier};
use crate::error::CoreError;
use crate::model::ProvisioningResult;
use crate::provisioning::ProvisioningClient;
use crate::session::{HubConnector, HubSession};
use crate::sync::TwinSynchronizer;

/// What the caller knows about the device it wants to run as.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub device_id: String,
    pub scope_id: Option<String>,
    pub symmetric_key: Option<SecretString>,
    /// Skip provisioning and connect to this hub directly.
    pub hub_host: Option<String>,
}

pub struct DeviceAgent {
    resolver: CredentialResolver,
    provisioning: ProvisioningClient,
    connector: Arc<dyn HubConnector>,
    session_config: SessionConfig,
    current: Mutex<Option<TwinSynchronizer>>,
}

impl DeviceAgent {
    pub fn new(
        resolver: CredentialResolver,
        provisioning: ProvisioningClient,
        connector: Arc<dyn HubConnector>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            resolver,
            provisioning,
            connector,
            session_config,
            current: Mutex::new(None),
        }
    }

    /// Run the full workflow and return the synchronized twin handle.
    ///
    /// The agent lock is held only while swapping sessions, so
    /// [`current`](Self::current) and [`disconnect`](Self::disconnect) stay
    /// responsive during provisioning.
    pub async fn connect(
        &self,
        request: &ConnectRequest,
        supplier: &dyn TokenSupplier,
    ) -> Result<TwinSynchronizer, CoreError> {
        let previous = self.current.lock().await.take();
        if let Some(previous) = previous {
            info!("Tearing down previous hub session");
            previous.session().disconnect().await;
        }

        let sync = self.establish(request, supplier).await?;

        let superseded = self.current.lock().await.replace(sync.clone());
        if let Some(superseded) = superseded {
            info!("Tearing down hub session installed by a concurrent connect");
            superseded.session().disconnect().await;
        }
        Ok(sync)
    }

    async fn establish(
        &self,
        request: &ConnectRequest,
        supplier: &dyn TokenSupplier,
    ) -> Result<TwinSynchronizer, CoreError> {
        let supplied = SuppliedCredentials {
            scope_id: request.scope_id.clone(),
            symmetric_key: request.symmetric_key.clone(),
        };
        let identity = self
            .resolver
            .resolve(&request.device_id, &supplied, supplier)
            .await?;

        let hub_host = match request.hub_host {
            Some(ref host) => host.clone(),
            None => match self.provisioning.register(&identity).await? {
                ProvisioningResult::Assigned { hub_host } => hub_host,
                ProvisioningResult::Assigning => {
                    return Err(CoreError::NotAssigned {
                        reason: "registration still in progress".into(),
                    });
                }
                failed @ ProvisioningResult::Failed { .. } => {
                    return Err(CoreError::NotAssigned {
                        reason: failed.failure().unwrap_or_default(),
                    });
                }
            },
        };

        let session = HubSession::new(Arc::clone(&self.connector), self.session_config.clone());
        session.connect(&hub_host, &identity).await?;

        match TwinSynchronizer::start(session.clone()).await {
            Ok(sync) => Ok(sync),
            Err(e) => {
                session.disconnect().await;
                Err(e)
            }
        }
    }

    /// The synchronizer of the live session, if any.
    pub async fn current(&self) -> Option<TwinSynchronizer> {
        self.current.lock().await.clone()
    }

    /// Tear down the live session. Idempotent.
    pub async fn disconnect(&self) {
        if let Some(sync) = self.current.lock().await.take() {
            sync.session().disconnect().await;
        }
    }
}
