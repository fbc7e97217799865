// Hub service-side REST client
//
// Reads a device twin from the hub's service surface with a hub-scoped SAS
// token. The target host comes from the token's resource URI unless the
// client was built with an explicit base URL.

use std::time::Duration;

use secrecy::ExposeSecret;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::sas::SharedAccessSignature;
use crate::transport::{TransportConfig, send_error};

/// Hub service REST API version.
pub const SERVICE_API_VERSION: &str = "2021-04-12";

pub struct HubServiceClient {
    http: reqwest::Client,
    base_url: Option<Url>,
    timeout: Duration,
}

impl HubServiceClient {
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url: None,
            timeout: transport.timeout,
        })
    }

    /// Pin every request to `base_url` instead of deriving it from the token.
    pub fn with_base_url(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url: Some(base_url),
            timeout: TransportConfig::default().timeout,
        }
    }

    fn twin_url(&self, device_id: &str, sas: &SharedAccessSignature) -> Result<Url, Error> {
        let base = match self.base_url {
            Some(ref url) => url.as_str().trim_end_matches('/').to_owned(),
            None => format!("https://{}", sas.hub_host()),
        };
        let url = Url::parse_with_params(
            &format!("{base}/twins/{device_id}"),
            &[("api-version", SERVICE_API_VERSION)],
        )?;
        Ok(url)
    }

    /// `GET /twins/{id}`. A non-success answer keeps the raw body in
    /// [`Error::Remote`] so callers can relay the hub's own error document.
    pub async fn get_twin(
        &self,
        device_id: &str,
        sas: &SharedAccessSignature,
    ) -> Result<serde_json::Value, Error> {
        let url = self.twin_url(device_id, sas)?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, sas.to_token().expose_secret())
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(Error::Remote {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}
