// ── Device twin domain model ──
//
// The identity a device provisions with, the outcome of provisioning, the
// twin document view shared by the session and synchronizer, and the
// payloads exchanged over the session's inbound channels.

pub mod identity;
pub mod method;
pub mod provisioning;
pub mod tenant;
pub mod twin;

// ── Re-exports ──────────────────────────────────────────────────────

pub use identity::DeviceIdentity;
pub use method::{MethodInvocation, MethodResponse};
pub use provisioning::{ProvisioningFailure, ProvisioningResult};
pub use tenant::TenantSasToken;
pub use twin::{AckStatus, DesiredPatch, DesiredUpdate, TwinState, merge_patch};
