// twinview-core: Provisioning, hub session lifecycle, and twin synchronization
// between twinview-api and consumers (CLI, proxy service).

pub mod agent;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod hub;
pub mod model;
pub mod provisioning;
pub mod session;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use agent::{ConnectRequest, DeviceAgent};
pub use config::{ProvisioningConfig, SessionConfig, TlsMode, TransportConfig};
pub use credentials::{CredentialResolver, StaticTokenSupplier, SuppliedCredentials, TokenSupplier};
pub use discovery::{DiscoveredTwin, HubDiscovery, TwinLookup, fetch_tenant_tokens};
pub use error::CoreError;
pub use hub::MqttConnector;
pub use provisioning::ProvisioningClient;
pub use session::{Connected, HubConnection, HubConnector, HubReply, HubSession, InboundEvent, SessionState};
pub use sync::{SyncEvent, TwinSynchronizer};

pub use model::{
    AckStatus, DesiredPatch, DesiredUpdate, DeviceIdentity, MethodInvocation, MethodResponse,
    ProvisioningFailure, ProvisioningResult, TenantSasToken, TwinState,
};
