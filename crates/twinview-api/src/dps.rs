// Device Provisioning Service HTTPS client
//
// Two calls make up a registration: a PUT that submits the request and
// returns an operation id, and a GET that reports the operation's status.
// Polling policy (backoff, wall-clock budget) belongs to the caller.

use std::time::Duration;

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::sas::SharedAccessSignature;
use crate::transport::{TransportConfig, decode_json, send_error};

/// Global DPS endpoint.
pub const DEFAULT_DPS_ENDPOINT: &str = "https://global.azure-devices-provisioning.net";

/// REST API version spoken by this client.
pub const DPS_API_VERSION: &str = "2019-03-31";

/// Body of the registration PUT.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationRequest<'a> {
    registration_id: &'a str,
}

/// Registration operation as reported by DPS.
///
/// `status` is `unassigned` or `assigning` while in progress, and
/// `assigned`, `failed`, or `disabled` once terminal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOperation {
    pub operation_id: String,
    pub status: String,
    #[serde(default)]
    pub registration_state: Option<RegistrationState>,
}

impl RegistrationOperation {
    /// Whether DPS is still working on the registration.
    pub fn is_pending(&self) -> bool {
        matches!(self.status.as_str(), "assigning" | "unassigned")
    }
}

/// Outcome details attached to a registration operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationState {
    #[serde(default)]
    pub registration_id: Option<String>,
    #[serde(default)]
    pub assigned_hub: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Stateless HTTPS client for DPS registration.
pub struct DpsClient {
    http: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl DpsClient {
    /// Create a client for `endpoint` from a `TransportConfig`.
    pub fn new(endpoint: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            endpoint,
            timeout: transport.timeout,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoint: Url) -> Self {
        Self {
            http,
            endpoint,
            timeout: TransportConfig::default().timeout,
        }
    }

    /// The DPS endpoint this client talks to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn registration_url(&self, scope_id: &str, device_id: &str, suffix: &str) -> Result<Url, Error> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let url = Url::parse_with_params(
            &format!("{base}/{scope_id}/registrations/{device_id}/{suffix}"),
            &[("api-version", DPS_API_VERSION)],
        )?;
        Ok(url)
    }

    /// Submit a registration request.
    pub async fn register(
        &self,
        scope_id: &str,
        device_id: &str,
        sas: &SharedAccessSignature,
    ) -> Result<RegistrationOperation, Error> {
        let url = self.registration_url(scope_id, device_id, "register")?;
        debug!("PUT {}", url);

        let resp = self
            .http
            .put(url)
            .header(reqwest::header::AUTHORIZATION, sas.to_token().expose_secret())
            .json(&RegistrationRequest {
                registration_id: device_id,
            })
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        decode_json(resp).await
    }

    /// Fetch the current status of a registration operation.
    pub async fn operation_status(
        &self,
        scope_id: &str,
        device_id: &str,
        operation_id: &str,
        sas: &SharedAccessSignature,
    ) -> Result<RegistrationOperation, Error> {
        let url =
            self.registration_url(scope_id, device_id, &format!("operations/{operation_id}"))?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, sas.to_token().expose_secret())
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        decode_json(resp).await
    }
}
