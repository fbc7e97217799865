// ── Core error types ──
//
// Engine-facing errors from twinview-core. Consumers never see reqwest,
// WebSocket, or MQTT details directly: `From<twinview_api::Error>`
// translates wire-level failures into this taxonomy.

use thiserror::Error;

/// Unified error type for the core crate.
///
/// `Clone` so a single failure can be delivered to every caller whose
/// write was coalesced into the same wire request.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Credential errors ────────────────────────────────────────────
    /// Bad or expired credential. Never retried automatically.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Provisioning credentials could not be obtained.
    #[error("Credential error: {message}")]
    Credential { message: String },

    // ── Transport errors ─────────────────────────────────────────────
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("No live hub session")]
    NotConnected,

    // ── Remote errors ────────────────────────────────────────────────
    /// The hub or service rejected a well-formed request.
    #[error("Remote error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Twin for device '{device_id}' not found in any of {tenants} hub tenant(s)")]
    NotFound { device_id: String, tenants: usize },

    #[error("Device was not assigned to a hub: {reason}")]
    NotAssigned { reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    /// Malformed payload. Dropped locally; the session stays alive.
    #[error("Malformed payload: {message}")]
    Decode { message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },
}

impl CoreError {
    /// Returns `true` for failures a caller may retry with backoff.
    /// Throttling and 5xx replies count as transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Remote { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Returns `true` if the credential was rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub(crate) fn decode(err: &serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<twinview_api::Error> for CoreError {
    fn from(err: twinview_api::Error) -> Self {
        use twinview_api::Error as Api;

        match err {
            Api::Authentication { message } | Api::InvalidKey(message) => CoreError::Auth { message },
            Api::MalformedToken(message) => CoreError::Credential { message },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if let Some(status) = e.status() {
                    CoreError::Remote {
                        status: status.as_u16(),
                        message: e.to_string(),
                    }
                } else {
                    CoreError::Network {
                        message: e.to_string(),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Validation {
                message: format!("Invalid URL: {e}"),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Tls(msg) => CoreError::Network {
                message: format!("TLS error: {msg}"),
            },
            Api::Remote { status, message } => CoreError::Remote { status, message },
            Api::WebSocketConnect(message) => CoreError::Network { message },
            Api::WebSocketClosed { code, reason } => CoreError::Network {
                message: format!("hub closed the connection (code {code}): {reason}"),
            },
            Api::Protocol(msg) => CoreError::Network {
                message: format!("protocol error: {msg}"),
            },
            Api::ConnectionRefused { code } => CoreError::Remote {
                status: u16::from(code),
                message: "hub refused the connection".into(),
            },
            Api::SessionClosed => CoreError::NotConnected,
            Api::Deserialization { message, .. } => CoreError::Decode { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_map_to_auth() {
        let err: CoreError = twinview_api::Error::Authentication {
            message: "401".into(),
        }
        .into();
        assert!(err.is_auth());

        let err: CoreError = twinview_api::Error::InvalidKey("bad base64".into()).into();
        assert!(err.is_auth());
    }

    #[test]
    fn connack_refusal_is_remote() {
        let err: CoreError = twinview_api::Error::ConnectionRefused { code: 3 }.into();
        assert!(matches!(err, CoreError::Remote { status: 3, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn closed_session_is_not_connected() {
        let err: CoreError = twinview_api::Error::SessionClosed.into();
        assert!(matches!(err, CoreError::NotConnected));
    }

    #[test]
    fn timeouts_and_socket_failures_are_transient() {
        let err: CoreError = twinview_api::Error::Timeout { timeout_secs: 30 }.into();
        assert!(err.is_transient());
        let err: CoreError = twinview_api::Error::WebSocketConnect("refused".into()).into();
        assert!(err.is_transient());
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let unavailable: CoreError = twinview_api::Error::Remote {
            status: 503,
            message: String::new(),
        }
        .into();
        assert!(unavailable.is_transient());

        let bad_request = CoreError::Remote {
            status: 400,
            message: String::new(),
        };
        assert!(!bad_request.is_transient());
    }
}
