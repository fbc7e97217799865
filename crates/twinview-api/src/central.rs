// Management-plane (IoT Central) REST client
//
// Every call takes the bearer token explicitly: tokens come from an external
// authentication collaborator on demand, so the client never caches one.

use std::time::Duration;

use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::{TransportConfig, decode_json, send_error};

const DEVICES_PREFIX: &str = "api/preview/devices";

/// Device connection credentials as returned by `GET /devices/{id}/credentials`.
#[derive(Debug, Clone, Default)]
pub struct DeviceCredentials {
    pub id_scope: Option<String>,
    pub symmetric_key: Option<SymmetricKey>,
}

#[derive(Debug, Clone, Default)]
pub struct SymmetricKey {
    pub primary_key: Option<SecretString>,
    pub secondary_key: Option<SecretString>,
}

impl DeviceCredentials {
    /// The primary symmetric key, if present and non-empty.
    pub fn primary_key(&self) -> Option<&SecretString> {
        self.symmetric_key
            .as_ref()
            .and_then(|k| k.primary_key.as_ref())
            .filter(|k| !k.expose_secret().is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsBody {
    #[serde(default)]
    id_scope: Option<String>,
    #[serde(default)]
    symmetric_key: Option<SymmetricKeyBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymmetricKeyBody {
    #[serde(default)]
    primary_key: Option<String>,
    #[serde(default)]
    secondary_key: Option<String>,
}

impl From<CredentialsBody> for DeviceCredentials {
    fn from(body: CredentialsBody) -> Self {
        Self {
            id_scope: body.id_scope.filter(|s| !s.is_empty()),
            symmetric_key: body.symmetric_key.map(|k| SymmetricKey {
                primary_key: k.primary_key.map(SecretString::from),
                secondary_key: k.secondary_key.map(SecretString::from),
            }),
        }
    }
}

/// A hub-scoped SAS token for one tenant behind an application.
#[derive(Debug, Clone)]
pub struct HubTenantToken {
    pub hub_name: String,
    pub sas_token: SecretString,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubTokenEntry {
    iothub_tenant_sas_token: TenantToken,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantToken {
    sas_token: String,
}

/// Client for one management-plane application.
pub struct CentralClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl CentralClient {
    /// Build the canonical application URL, `https://{app_id}.azureiotcentral.com/`.
    pub fn app_url(app_id: &str) -> Result<Url, Error> {
        Ok(Url::parse(&format!("https://{app_id}.azureiotcentral.com/"))?)
    }

    /// Create a client for the application at `base_url`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url,
            timeout: transport.timeout,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout: TransportConfig::default().timeout,
        }
    }

    /// The application base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// `GET /devices/{id}/properties` -- the management plane's view of the twin.
    pub async fn device_properties(
        &self,
        device_id: &str,
        bearer: &SecretString,
    ) -> Result<serde_json::Value, Error> {
        let url = self.url(&format!("{DEVICES_PREFIX}/{device_id}/properties"))?;
        self.get(url, bearer).await
    }

    /// `GET /devices/{id}/credentials` -- scope id and symmetric keys.
    pub async fn device_credentials(
        &self,
        device_id: &str,
        bearer: &SecretString,
    ) -> Result<DeviceCredentials, Error> {
        let url = self.url(&format!("{DEVICES_PREFIX}/{device_id}/credentials"))?;
        let body: CredentialsBody = self.get(url, bearer).await?;
        Ok(body.into())
    }

    /// `POST /system/iothubs/generateSasTokens` -- one token per hub tenant.
    ///
    /// Tenants are returned in the order the service lists them.
    pub async fn generate_sas_tokens(
        &self,
        bearer: &SecretString,
    ) -> Result<Vec<HubTenantToken>, Error> {
        let url = self.url("system/iothubs/generateSasTokens")?;
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .bearer_auth(bearer.expose_secret())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        let hubs: IndexMap<String, HubTokenEntry> = decode_json(resp).await?;
        Ok(hubs
            .into_iter()
            .map(|(hub_name, entry)| HubTenantToken {
                hub_name,
                sas_token: SecretString::from(entry.iothub_tenant_sas_token.sas_token),
            })
            .collect())
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        bearer: &SecretString,
    ) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .bearer_auth(bearer.expose_secret())
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        decode_json(resp).await
    }
}
