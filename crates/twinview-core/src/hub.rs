// ── MQTT hub connector ──
//
// Adapts `twinview_api::HubClient` (MQTT over WebSocket) to the session's
// `HubConnector`/`HubConnection` capability traits.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use twinview_api::{HubClient, HubConnectOptions, HubEvent, SharedAccessSignature, TwinResponse};
use url::Url;

use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::model::MethodResponse;
use crate::session::{Connected, HubConnection, HubConnector, HubReply, InboundEvent};

/// Connects to hubs over MQTT 3.1.1 on a secure WebSocket.
#[derive(Debug, Clone, Default)]
pub struct MqttConnector {
    url_override: Option<Url>,
}

impl MqttConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to `url` instead of the hub's public WebSocket endpoint.
    pub fn with_url(url: Url) -> Self {
        Self {
            url_override: Some(url),
        }
    }
}

#[async_trait]
impl HubConnector for MqttConnector {
    async fn connect(
        &self,
        hub_host: &str,
        device_id: &str,
        sas: &SharedAccessSignature,
        config: &SessionConfig,
    ) -> Result<Connected, CoreError> {
        let mut options = HubConnectOptions::new(hub_host, device_id, sas.to_token());
        options.keep_alive = config.keep_alive;
        options.handshake_timeout = config.handshake_timeout;
        options.request_timeout = config.request_timeout;
        options.url.clone_from(&self.url_override);

        let (client, hub_events) = HubClient::connect(options).await?;

        let (tx, events) = mpsc::unbounded_channel();
        tokio::spawn(forward_events(hub_events, tx));

        Ok(Connected {
            connection: Arc::new(MqttConnection { client }),
            events,
        })
    }
}

struct MqttConnection {
    client: HubClient,
}

impl From<TwinResponse> for HubReply {
    fn from(resp: TwinResponse) -> Self {
        Self {
            status: resp.status,
            version: resp.version,
            body: resp.body,
        }
    }
}

#[async_trait]
impl HubConnection for MqttConnection {
    async fn get_twin(&self) -> Result<HubReply, CoreError> {
        Ok(self.client.get_twin().await?.into())
    }

    async fn patch_reported(&self, patch: Bytes) -> Result<HubReply, CoreError> {
        Ok(self.client.patch_reported(patch).await?.into())
    }

    async fn send_telemetry(&self, payload: Bytes) -> Result<(), CoreError> {
        Ok(self.client.send_telemetry(payload).await?)
    }

    async fn respond_to_method(&self, rid: &str, response: &MethodResponse) -> Result<(), CoreError> {
        let body = serde_json::to_vec(&response.payload).map_err(|e| CoreError::decode(&e))?;
        Ok(self
            .client
            .respond_to_method(rid, response.status, Bytes::from(body))?)
    }

    async fn close(&self) {
        self.client.disconnect().await;
    }
}

/// Translate wire events into session events until the connection ends.
async fn forward_events(
    mut hub_events: mpsc::UnboundedReceiver<HubEvent>,
    tx: mpsc::UnboundedSender<InboundEvent>,
) {
    while let Some(event) = hub_events.recv().await {
        let event = match event {
            HubEvent::DesiredPatch { version, payload } => {
                InboundEvent::DesiredPatch { version, payload }
            }
            HubEvent::MethodCall { name, rid, payload } => {
                InboundEvent::MethodCall { name, rid, payload }
            }
            HubEvent::Disconnected { error } => InboundEvent::Disconnected {
                error: error.map(CoreError::from),
            },
        };
        if tx.send(event).is_err() {
            break;
        }
    }
}
