// twinview-api: Async Rust clients for the device provisioning service,
// the IoT hub device and service surfaces, and the management-plane REST API.

pub mod central;
pub mod dps;
pub mod error;
pub mod hub;
pub mod mqtt;
pub mod proxy;
pub mod sas;
pub mod service;
pub mod transport;

pub use central::{CentralClient, DeviceCredentials, HubTenantToken, SymmetricKey};
pub use dps::{DpsClient, RegistrationOperation, RegistrationState};
pub use error::Error;
pub use hub::{HubClient, HubConnectOptions, HubEvent, TwinResponse};
pub use proxy::TwinProxyClient;
pub use sas::SharedAccessSignature;
pub use service::HubServiceClient;
pub use transport::{TlsMode, TransportConfig};
