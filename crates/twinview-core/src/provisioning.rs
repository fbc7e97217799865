// ── Provisioning client ──
//
// Exchanges a device identity for an assigned hub host. Submits the DPS
// registration, then polls the operation with exponential backoff until it
// reaches a terminal status or the wall-clock budget runs out. Stateless
// across calls: nothing is retained between registrations.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use twinview_api::dps::DEFAULT_DPS_ENDPOINT;
use twinview_api::sas::dps_resource;
use twinview_api::{DpsClient, RegistrationOperation, SharedAccessSignature, TransportConfig};
use url::Url;

use crate::config::{ProvisioningConfig, SessionConfig};
use crate::error::CoreError;
use crate::model::{DeviceIdentity, ProvisioningFailure, ProvisioningResult};

/// Key name DPS expects for symmetric-key registration tokens.
const REGISTRATION_KEY_NAME: &str = "registration";

pub struct ProvisioningClient {
    dps: DpsClient,
    config: ProvisioningConfig,
    token_ttl: Duration,
}

impl ProvisioningClient {
    pub fn new(config: ProvisioningConfig, transport: &TransportConfig) -> Result<Self, CoreError> {
        let endpoint = match config.endpoint {
            Some(ref url) => url.clone(),
            None => Url::parse(DEFAULT_DPS_ENDPOINT).map_err(|e| CoreError::Validation {
                message: format!("Invalid DPS endpoint: {e}"),
            })?,
        };
        Ok(Self::with_dps(DpsClient::new(endpoint, transport)?, config))
    }

    /// Build around an existing DPS client.
    pub fn with_dps(dps: DpsClient, config: ProvisioningConfig) -> Self {
        Self {
            dps,
            config,
            token_ttl: SessionConfig::default().token_ttl,
        }
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Register `identity` and wait for DPS to assign a hub.
    ///
    /// Returns `Failed { Timeout }` when the budget is exhausted while DPS is
    /// still assigning. Credential rejection surfaces as [`CoreError::Auth`];
    /// transient transport errors during polling are retried within the budget.
    pub async fn register(&self, identity: &DeviceIdentity) -> Result<ProvisioningResult, CoreError> {
        let budget = self.config.budget;
        let deadline = Instant::now() + budget;

        match tokio::time::timeout_at(deadline, self.register_until_terminal(identity)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    device_id = identity.device_id(),
                    budget_secs = budget.as_secs(),
                    "Provisioning budget exhausted"
                );
                Ok(ProvisioningResult::Failed {
                    reason: ProvisioningFailure::Timeout,
                    message: None,
                })
            }
        }
    }

    async fn register_until_terminal(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<ProvisioningResult, CoreError> {
        let sas = self.sign(identity)?;
        let scope_id = identity.scope_id();
        let device_id = identity.device_id();

        info!(device_id, scope_id, "Submitting DPS registration");
        let mut op = self.dps.register(scope_id, device_id, &sas).await?;
        let mut attempt: u32 = 0;

        loop {
            let result = ProvisioningResult::from_operation(&op);
            if result != ProvisioningResult::Assigning {
                log_outcome(device_id, &result);
                return Ok(result);
            }

            let delay = calculate_backoff(attempt, &self.config);
            debug!(
                device_id,
                status = %op.status,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Registration pending, polling again"
            );
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);

            op = match self.poll(identity, &op, &sas).await {
                Ok(next) => next,
                Err(e) if e.is_transient() => {
                    warn!(device_id, error = %e, attempt, "Status poll failed, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };
        }
    }

    async fn poll(
        &self,
        identity: &DeviceIdentity,
        op: &RegistrationOperation,
        sas: &SharedAccessSignature,
    ) -> Result<RegistrationOperation, CoreError> {
        let next = self
            .dps
            .operation_status(identity.scope_id(), identity.device_id(), &op.operation_id, sas)
            .await?;
        Ok(next)
    }

    fn sign(&self, identity: &DeviceIdentity) -> Result<SharedAccessSignature, CoreError> {
        let ttl = chrono::Duration::from_std(self.token_ttl).map_err(|e| CoreError::Validation {
            message: format!("token lifetime out of range: {e}"),
        })?;
        let sas = SharedAccessSignature::sign(
            &dps_resource(identity.scope_id(), identity.device_id()),
            identity.symmetric_key(),
            Some(REGISTRATION_KEY_NAME),
            Utc::now() + ttl,
        )?;
        Ok(sas)
    }
}

fn log_outcome(device_id: &str, result: &ProvisioningResult) {
    match result {
        ProvisioningResult::Assigned { hub_host } => {
            info!(device_id, hub = %hub_host, "Device assigned to hub");
        }
        ProvisioningResult::Failed { reason, message } => {
            warn!(device_id, %reason, message = message.as_deref(), "Registration failed");
        }
        ProvisioningResult::Assigning => {}
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
fn calculate_backoff(attempt: u32, config: &ProvisioningConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(31) as i32);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_waits_initial_delay() {
        let config = ProvisioningConfig::default();
        assert_eq!(calculate_backoff(0, &config), Duration::from_secs(1));
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ProvisioningConfig::default();
        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);
        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ProvisioningConfig::default();
        for attempt in [10, 40, u32::MAX] {
            let delay = calculate_backoff(attempt, &config);
            assert!(
                delay <= Duration::from_secs_f64(30.0 * 1.25),
                "attempt {attempt} gave {delay:?}"
            );
        }
    }
}
