// ── Runtime engine configuration ──
//
// These types describe *how* to provision and hold a hub session.
// They carry endpoints and timing only and never touch disk; the CLI
// builds them from its profile and hands them in.

use std::time::Duration;

use url::Url;

pub use twinview_api::{TlsMode, TransportConfig};

/// Provisioning poll policy.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// DPS endpoint. `None` uses the global endpoint.
    pub endpoint: Option<Url>,
    /// Delay before the first status poll.
    pub initial_delay: Duration,
    /// Upper bound on the backoff between polls.
    pub max_delay: Duration,
    /// Wall-clock budget for the whole registration.
    pub budget: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            budget: Duration::from_secs(60),
        }
    }
}

/// Hub session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub keep_alive: Duration,
    /// Lifetime of the SAS token minted for each connection.
    pub token_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(60),
            token_ttl: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = ProvisioningConfig::default();
        assert!(p.endpoint.is_none());
        assert_eq!(p.initial_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(30));
        assert_eq!(p.budget, Duration::from_secs(60));

        let s = SessionConfig::default();
        assert_eq!(s.handshake_timeout, Duration::from_secs(30));
        assert_eq!(s.keep_alive, Duration::from_secs(60));
        assert_eq!(s.token_ttl, Duration::from_secs(3600));
    }
}
