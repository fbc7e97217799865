//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

use twinview_config::ConfigError;
use twinview_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Network error: {message}")]
    #[diagnostic(
        code(twinview::connection_failed),
        help(
            "Check network access to the hub, DPS, and management plane.\n\
             Behind a TLS-inspecting proxy? Try --insecure (-k) or set ca_cert in your profile."
        )
    )]
    ConnectionFailed { message: String },

    #[error("No live hub session")]
    #[diagnostic(
        code(twinview::not_connected),
        help("The hub closed the connection. Run the command again to reconnect.")
    )]
    NotConnected,

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(twinview::auth_failed),
        help(
            "Verify the device symmetric key and id scope, or the management-plane token.\n\
             Store fresh secrets with: twinview config set-key / twinview config set-token"
        )
    )]
    AuthFailed { message: String },

    #[error("Could not obtain device credentials: {message}")]
    #[diagnostic(
        code(twinview::credentials),
        help(
            "Pass --scope-id and --symmetric-key, or configure an application with --app-id\n\
             and an access token so they can be fetched."
        )
    )]
    Credentials { message: String },

    #[error("No {what} configured for profile '{profile}'")]
    #[diagnostic(
        code(twinview::missing_setting),
        help("Pass {flag}, or configure it with: twinview config init")
    )]
    MissingSetting {
        what: String,
        flag: String,
        profile: String,
    },

    // ── Remote ───────────────────────────────────────────────────────

    #[error("Twin for device '{device_id}' not found in any of {tenants} hub tenant(s)")]
    #[diagnostic(
        code(twinview::not_found),
        help("Check the device id and that the access token can see every hub in the application.")
    )]
    TwinNotFound { device_id: String, tenants: usize },

    #[error("Device was not assigned to a hub: {reason}")]
    #[diagnostic(
        code(twinview::not_assigned),
        help("Check the device's enrollment, or raise the budget with --budget.")
    )]
    NotAssigned { reason: String },

    #[error("Remote error (status {status}): {message}")]
    #[diagnostic(code(twinview::remote))]
    Remote { status: u16, message: String },

    #[error("Malformed payload: {message}")]
    #[diagnostic(code(twinview::decode))]
    Decode { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(twinview::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(twinview::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: twinview config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error(transparent)]
    #[diagnostic(code(twinview::config))]
    Config(#[from] ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Operation timed out after {seconds}s")]
    #[diagnostic(
        code(twinview::timeout),
        help("Increase the timeout with --timeout or check network latency.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(twinview::json), help("Quote JSON arguments for your shell, e.g. '{{\"a\":1}}'."))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::Credentials { .. } => exit_code::AUTH,
            Self::TwinNotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::MissingSetting { .. } | Self::Json(_) => exit_code::USAGE,
            Self::Config(ConfigError::Missing { .. }) => exit_code::AUTH,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Auth { message } => Self::AuthFailed { message },
            CoreError::Credential { message } => Self::Credentials { message },
            CoreError::Network { message } => Self::ConnectionFailed { message },
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::NotConnected => Self::NotConnected,
            CoreError::Remote { status, message } => Self::Remote { status, message },
            CoreError::NotFound { device_id, tenants } => Self::TwinNotFound { device_id, tenants },
            CoreError::NotAssigned { reason } => Self::NotAssigned { reason },
            CoreError::Decode { message } => Self::Decode { message },
            CoreError::Validation { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
        }
    }
}

impl From<twinview_api::Error> for CliError {
    fn from(err: twinview_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
