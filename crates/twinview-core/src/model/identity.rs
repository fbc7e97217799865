// ── Device identity ──

use secrecy::{ExposeSecret, SecretString};

use crate::error::CoreError;

/// Longest device id the hub accepts.
pub const MAX_DEVICE_ID_LEN: usize = 128;

/// Punctuation allowed in a hub device id besides ASCII alphanumerics.
const DEVICE_ID_PUNCTUATION: &str = "-.%_*?!(),:=@$'";

/// The credential triple a device provisions and authenticates with.
///
/// Immutable once built; SAS tokens are derived from it per request or
/// connection.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    device_id: String,
    scope_id: String,
    symmetric_key: SecretString,
}

impl DeviceIdentity {
    pub fn new(
        device_id: impl Into<String>,
        scope_id: impl Into<String>,
        symmetric_key: SecretString,
    ) -> Result<Self, CoreError> {
        let device_id = device_id.into();
        let scope_id = scope_id.into();

        validate_device_id(&device_id)?;
        if scope_id.trim().is_empty() {
            return Err(CoreError::Validation {
                message: "scope id must not be empty".into(),
            });
        }
        if symmetric_key.expose_secret().trim().is_empty() {
            return Err(CoreError::Validation {
                message: "symmetric key must not be empty".into(),
            });
        }

        Ok(Self {
            device_id,
            scope_id,
            symmetric_key,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn symmetric_key(&self) -> &SecretString {
        &self.symmetric_key
    }
}

/// Check `id` against the hub's device id rules.
pub fn validate_device_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation {
            message: "device id must not be empty".into(),
        });
    }
    if id.chars().count() > MAX_DEVICE_ID_LEN {
        return Err(CoreError::Validation {
            message: format!("device id exceeds {MAX_DEVICE_ID_LEN} characters"),
        });
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || DEVICE_ID_PUNCTUATION.contains(*c)))
    {
        return Err(CoreError::Validation {
            message: format!("device id contains invalid character {bad:?}"),
        });
    }
    Ok(())
}
