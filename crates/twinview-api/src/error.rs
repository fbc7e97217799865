use thiserror::Error;

/// Top-level error type for the `twinview-api` crate.
///
/// Covers every failure mode across all wire surfaces:
/// authentication, HTTP transport, DPS and management-plane REST,
/// the hub WebSocket, and the MQTT protocol running over it.
/// `twinview-core` maps these into the engine's error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credential rejected by the remote (HTTP 401/403, MQTT CONNACK 4/5).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The symmetric key could not be used for signing.
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// A shared access signature string could not be parsed.
    #[error("Malformed shared access signature: {0}")]
    MalformedToken(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request or handshake timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Remote ──────────────────────────────────────────────────────
    /// The remote answered a well-formed request with a non-success status.
    #[error("Remote error (status {status}): {message}")]
    Remote { status: u16, message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the hub.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── MQTT ────────────────────────────────────────────────────────
    /// Malformed or unexpected MQTT packet.
    #[error("MQTT protocol error: {0}")]
    Protocol(String),

    /// CONNACK carried a non-zero return code other than the auth codes.
    #[error("Connection refused by hub (return code {code})")]
    ConnectionRefused { code: u8 },

    /// The hub session ended while a request was outstanding.
    #[error("Hub session closed")]
    SessionClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the remote rejected our credential.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Authentication { .. } | Self::InvalidKey(_) => true,
            Self::Remote { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::SessionClosed => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Remote { status: 404, .. } => true,
            _ => false,
        }
    }

    /// The remote status code, when the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
