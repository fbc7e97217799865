// Twin proxy HTTP client
//
// Browser-side callers cannot hold hub service credentials, so cloud twin
// lookups go through `GET /api/twin/:deviceId` on the surrounding service,
// which forwards a hub-scoped SAS token from the `Authorization` header.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::{TransportConfig, send_error};

/// Error body the proxy returns alongside HTTP 500.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProxyErrorBody {
    message: Option<String>,
}

pub struct TwinProxyClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl TwinProxyClient {
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url,
            timeout: transport.timeout,
        })
    }

    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout: TransportConfig::default().timeout,
        }
    }

    /// Fetch the service-side twin of `device_id` using a hub-scoped SAS token.
    pub async fn get_twin(
        &self,
        device_id: &str,
        sas_token: &SecretString,
    ) -> Result<serde_json::Value, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let url = Url::parse(&format!("{base}/api/twin/{device_id}"))?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, sas_token.expose_secret())
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProxyErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(body);
            return Err(Error::Remote {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
