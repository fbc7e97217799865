//! Device-side hub connection: MQTT 3.1.1 over a WebSocket.
//!
//! [`HubClient::connect`] opens the WebSocket (subprotocol `mqtt`), sends
//! CONNECT with the device's SAS token as password, and subscribes to twin
//! responses, desired-property pushes, and direct-method calls. A background
//! task then owns the socket: it writes outbound packets, sends keep-alive
//! pings, answers QoS 1 publishes, routes twin responses to their waiting
//! requests, and forwards pushes to the caller as [`HubEvent`]s.
//!
//! ```rust,ignore
//! let options = HubConnectOptions::new("hub-a.example.net", "dev1", sas.to_token());
//! let (client, mut events) = HubClient::connect(options).await?;
//! let twin = client.get_twin().await?;
//! ```

mod topic;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::mqtt::{
    CONNACK_BAD_CREDENTIALS, CONNACK_NOT_AUTHORIZED, Connect, Packet, PacketReader, Publish, QoS,
    SUBACK_FAILURE,
};
use topic::Inbound;

/// MQTT API version advertised in the CONNECT username.
pub const HUB_API_VERSION: &str = "2021-04-12";

const SUBSCRIBE_PACKET_ID: u16 = 1;
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// ── Options ──────────────────────────────────────────────────────────

/// Parameters for one hub connection.
#[derive(Debug, Clone)]
pub struct HubConnectOptions {
    /// Hub host name, e.g. `hub-a.example.net`.
    pub host: String,
    pub device_id: String,
    /// Rendered SAS token for `{host}/devices/{device_id}`.
    pub password: SecretString,
    pub keep_alive: Duration,
    /// Budget for WebSocket upgrade + CONNECT + SUBSCRIBE.
    pub handshake_timeout: Duration,
    /// How long a twin request or telemetry publish waits for its answer.
    pub request_timeout: Duration,
    /// Overrides the WebSocket URL derived from `host`.
    pub url: Option<Url>,
}

impl HubConnectOptions {
    pub fn new(
        host: impl Into<String>,
        device_id: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            host: host.into(),
            device_id: device_id.into(),
            password,
            keep_alive: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            url: None,
        }
    }

    /// `wss://{host}/$iothub/websocket?iothub-no-client-cert=true`
    pub fn websocket_url(&self) -> Result<Url, Error> {
        if let Some(ref url) = self.url {
            return Ok(url.clone());
        }
        Ok(Url::parse(&format!(
            "wss://{}/$iothub/websocket?iothub-no-client-cert=true",
            self.host
        ))?)
    }

    /// MQTT username: `{host}/{device_id}/?api-version=...`
    pub fn username(&self) -> String {
        format!(
            "{}/{}/?api-version={HUB_API_VERSION}",
            self.host, self.device_id
        )
    }
}

// ── Events and responses ─────────────────────────────────────────────

/// Unsolicited traffic from the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// Desired-property delta. `version` is `None` if the topic lacked `$version`.
    DesiredPatch { version: Option<i64>, payload: Bytes },
    /// Direct-method invocation; answer with [`HubClient::respond_to_method`].
    MethodCall {
        name: String,
        rid: String,
        payload: Bytes,
    },
    /// The connection ended. `error` is `None` for a local disconnect.
    Disconnected { error: Option<Error> },
}

/// The hub's answer to a twin GET or reported-properties PATCH.
#[derive(Debug, Clone)]
pub struct TwinResponse {
    pub status: u16,
    pub version: Option<i64>,
    pub body: Bytes,
}

// ── Client ───────────────────────────────────────────────────────────

/// Waiters shared between request callers and the I/O task.
#[derive(Default)]
struct Pending {
    twin: DashMap<String, oneshot::Sender<TwinResponse>>,
    acks: DashMap<u16, oneshot::Sender<()>>,
    closed: AtomicBool,
}

impl Pending {
    /// Mark the connection closed and drop every waiter, failing its request.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.twin.clear();
        self.acks.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A live MQTT session with the hub.
pub struct HubClient {
    device_id: String,
    outbound: mpsc::UnboundedSender<Packet>,
    pending: Arc<Pending>,
    next_rid: AtomicU64,
    next_packet_id: AtomicU16,
    request_timeout: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HubClient {
    /// Connect, authenticate, subscribe, and spawn the I/O task.
    ///
    /// Events arrive on the returned receiver until the final
    /// [`HubEvent::Disconnected`].
    pub async fn connect(
        options: HubConnectOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HubEvent>), Error> {
        let timeout_secs = options.handshake_timeout.as_secs();
        let (sink, source, reader) = tokio::time::timeout(options.handshake_timeout, handshake(&options))
            .await
            .map_err(|_| Error::Timeout { timeout_secs })??;

        tracing::info!(host = %options.host, device_id = %options.device_id, "Hub session established");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending::default());
        let cancel = CancellationToken::new();

        let io = IoTask {
            sink,
            source,
            reader,
            outbound: outbound_rx,
            pending: Arc::clone(&pending),
            events: event_tx,
            cancel: cancel.clone(),
            keep_alive: options.keep_alive,
        };
        let task = tokio::spawn(io.run());

        Ok((
            Self {
                device_id: options.device_id,
                outbound,
                pending,
                next_rid: AtomicU64::new(1),
                next_packet_id: AtomicU16::new(SUBSCRIBE_PACKET_ID + 1),
                request_timeout: options.request_timeout,
                cancel,
                task: Mutex::new(Some(task)),
            },
            event_rx,
        ))
    }

    /// Whether the I/O task is still running.
    pub fn is_connected(&self) -> bool {
        !self.pending.is_closed() && !self.cancel.is_cancelled()
    }

    /// Request the full twin document.
    pub async fn get_twin(&self) -> Result<TwinResponse, Error> {
        let rid = self.rid();
        self.twin_request(topic::twin_get(&rid), rid, Bytes::new())
            .await
    }

    /// Send a reported-properties patch. The hub answers 204 on success.
    pub async fn patch_reported(&self, patch: Bytes) -> Result<TwinResponse, Error> {
        let rid = self.rid();
        self.twin_request(topic::reported_patch(&rid), rid, patch)
            .await
    }

    /// Publish a device-to-cloud message at QoS 1 and wait for the PUBACK.
    pub async fn send_telemetry(&self, payload: Bytes) -> Result<(), Error> {
        let packet_id = self.packet_id();
        let (tx, rx) = oneshot::channel();
        self.pending.acks.insert(packet_id, tx);

        let publish = Publish::at_least_once(topic::telemetry(&self.device_id), packet_id, payload);
        if let Err(e) = self.enqueue(Packet::Publish(publish)) {
            self.pending.acks.remove(&packet_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                self.pending.acks.remove(&packet_id);
                Err(self.timeout_error())
            }
        }
    }

    /// Answer a direct-method call identified by `rid`.
    pub fn respond_to_method(&self, rid: &str, status: u16, payload: Bytes) -> Result<(), Error> {
        let publish = Publish::at_most_once(topic::method_response(status, rid), payload);
        self.enqueue(Packet::Publish(publish))
    }

    /// Send DISCONNECT and wait for the I/O task to finish. Idempotent.
    pub async fn disconnect(&self) {
        let Some(mut task) = self.task.lock().await.take() else {
            return;
        };

        let _ = self.outbound.send(Packet::Disconnect);
        if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
            tracing::warn!("Hub I/O task did not stop in time, cancelling");
            self.cancel.cancel();
            let _ = task.await;
        }
    }

    async fn twin_request(
        &self,
        topic: String,
        rid: String,
        payload: Bytes,
    ) -> Result<TwinResponse, Error> {
        let (tx, rx) = oneshot::channel();
        self.pending.twin.insert(rid.clone(), tx);

        if let Err(e) = self.enqueue(Packet::Publish(Publish::at_most_once(topic, payload))) {
            self.pending.twin.remove(&rid);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                self.pending.twin.remove(&rid);
                Err(self.timeout_error())
            }
        }
    }

    fn enqueue(&self, packet: Packet) -> Result<(), Error> {
        if self.pending.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.outbound
            .send(packet)
            .map_err(|_| Error::SessionClosed)
    }

    fn rid(&self) -> String {
        self.next_rid.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn packet_id(&self) -> u16 {
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && id != SUBSCRIBE_PACKET_ID {
                return id;
            }
        }
    }

    fn timeout_error(&self) -> Error {
        Error::Timeout {
            timeout_secs: self.request_timeout.as_secs(),
        }
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Handshake ────────────────────────────────────────────────────────

async fn handshake(options: &HubConnectOptions) -> Result<(WsSink, WsSource, PacketReader), Error> {
    let url = options.websocket_url()?;
    tracing::info!(url = %url, "Connecting to hub");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;
    let request = ClientRequestBuilder::new(uri).with_sub_protocol("mqtt");

    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(map_connect_error)?;
    let (mut sink, mut source) = ws.split();
    let mut reader = PacketReader::new();

    let connect = Packet::Connect(Connect {
        client_id: options.device_id.clone(),
        username: Some(options.username()),
        password: Some(options.password.expose_secret().to_owned()),
        keep_alive_secs: u16::try_from(options.keep_alive.as_secs()).unwrap_or(u16::MAX),
        clean_session: true,
    });
    write_packet(&mut sink, &connect).await?;

    match read_packet(&mut source, &mut reader).await? {
        Packet::ConnAck { code: 0, .. } => {}
        Packet::ConnAck {
            code: CONNACK_BAD_CREDENTIALS | CONNACK_NOT_AUTHORIZED,
            ..
        } => {
            return Err(Error::Authentication {
                message: "hub rejected the device credential".into(),
            });
        }
        Packet::ConnAck { code, .. } => return Err(Error::ConnectionRefused { code }),
        other => {
            return Err(Error::Protocol(format!("expected CONNACK, got {other:?}")));
        }
    }

    let subscribe = Packet::Subscribe {
        packet_id: SUBSCRIBE_PACKET_ID,
        topics: vec![
            (topic::TWIN_RESPONSES.into(), QoS::AtMostOnce),
            (topic::DESIRED_PATCHES.into(), QoS::AtMostOnce),
            (topic::METHOD_CALLS.into(), QoS::AtMostOnce),
        ],
    };
    write_packet(&mut sink, &subscribe).await?;

    match read_packet(&mut source, &mut reader).await? {
        Packet::SubAck { packet_id, codes } if packet_id == SUBSCRIBE_PACKET_ID => {
            if codes.contains(&SUBACK_FAILURE) {
                return Err(Error::Protocol("hub refused a subscription".into()));
            }
        }
        other => {
            return Err(Error::Protocol(format!("expected SUBACK, got {other:?}")));
        }
    }

    Ok((sink, source, reader))
}

fn map_connect_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(ref resp)
            if matches!(resp.status().as_u16(), 401 | 403) =>
        {
            Error::Authentication {
                message: format!("WebSocket upgrade rejected with HTTP {}", resp.status()),
            }
        }
        other => Error::WebSocketConnect(other.to_string()),
    }
}

async fn write_packet(sink: &mut WsSink, packet: &Packet) -> Result<(), Error> {
    let bytes = packet.to_bytes()?;
    sink.send(Message::binary(bytes))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))
}

/// Read frames until one complete packet is available.
async fn read_packet(source: &mut WsSource, reader: &mut PacketReader) -> Result<Packet, Error> {
    loop {
        if let Some(packet) = reader.next_packet()? {
            return Ok(packet);
        }
        match source.next().await {
            Some(Ok(Message::Binary(data))) => reader.push(&data),
            Some(Ok(Message::Close(frame))) => return Err(closed(frame)),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            None => return Err(Error::SessionClosed),
        }
    }
}

fn closed(frame: Option<tungstenite::protocol::CloseFrame>) -> Error {
    match frame {
        Some(cf) => Error::WebSocketClosed {
            code: cf.code.into(),
            reason: cf.reason.to_string(),
        },
        None => Error::WebSocketClosed {
            code: 1005,
            reason: String::new(),
        },
    }
}

// ── I/O task ─────────────────────────────────────────────────────────

struct IoTask {
    sink: WsSink,
    source: WsSource,
    reader: PacketReader,
    outbound: mpsc::UnboundedReceiver<Packet>,
    pending: Arc<Pending>,
    events: mpsc::UnboundedSender<HubEvent>,
    cancel: CancellationToken,
    keep_alive: Duration,
}

impl IoTask {
    async fn run(mut self) {
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + self.keep_alive,
            self.keep_alive,
        );

        let error = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break None,
                packet = self.outbound.recv() => {
                    let Some(packet) = packet else { break None };
                    let is_disconnect = matches!(packet, Packet::Disconnect);
                    if let Err(e) = write_packet(&mut self.sink, &packet).await {
                        break Some(e);
                    }
                    if is_disconnect {
                        let _ = self.sink.close().await;
                        break None;
                    }
                }
                _ = ping.tick() => {
                    tracing::trace!("MQTT PINGREQ");
                    if let Err(e) = write_packet(&mut self.sink, &Packet::PingReq).await {
                        break Some(e);
                    }
                }
                frame = self.source.next() => {
                    match frame {
                        Some(Ok(Message::Binary(data))) => {
                            self.reader.push(&data);
                            if let Err(e) = self.drain_packets().await {
                                break Some(e);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!("Hub closed the WebSocket");
                            break Some(closed(frame));
                        }
                        Some(Ok(_)) => {
                            // Text, Ping, Pong -- tungstenite answers pings itself
                        }
                        Some(Err(e)) => break Some(Error::WebSocketConnect(e.to_string())),
                        None => break Some(Error::SessionClosed),
                    }
                }
            }
        };

        self.pending.close();
        match error {
            Some(ref e) => tracing::warn!(error = %e, "Hub connection lost"),
            None => tracing::debug!("Hub connection closed locally"),
        }
        let _ = self.events.send(HubEvent::Disconnected { error });
    }

    async fn drain_packets(&mut self) -> Result<(), Error> {
        while let Some(packet) = self.reader.next_packet()? {
            match packet {
                Packet::Publish(publish) => {
                    if let (QoS::AtLeastOnce, Some(packet_id)) = (publish.qos, publish.packet_id) {
                        write_packet(&mut self.sink, &Packet::PubAck { packet_id }).await?;
                    }
                    self.route(publish);
                }
                Packet::PubAck { packet_id } => {
                    if let Some((_, waiter)) = self.pending.acks.remove(&packet_id) {
                        let _ = waiter.send(());
                    }
                }
                Packet::PingResp => tracing::trace!("MQTT PINGRESP"),
                other => tracing::debug!(packet = ?other, "Ignoring unexpected packet"),
            }
        }
        Ok(())
    }

    fn route(&self, publish: Publish) {
        match topic::classify(&publish.topic) {
            Inbound::TwinResponse {
                status,
                rid,
                version,
            } => {
                let waiter = rid.and_then(|rid| self.pending.twin.remove(&rid));
                match waiter {
                    Some((_, tx)) => {
                        let _ = tx.send(TwinResponse {
                            status,
                            version,
                            body: publish.payload,
                        });
                    }
                    None => tracing::debug!(topic = %publish.topic, "Twin response with no waiter"),
                }
            }
            Inbound::DesiredPatch { version } => {
                let _ = self.events.send(HubEvent::DesiredPatch {
                    version,
                    payload: publish.payload,
                });
            }
            Inbound::MethodCall { name, rid } => {
                let Some(rid) = rid else {
                    tracing::warn!(method = %name, "Direct method call without $rid");
                    return;
                };
                let _ = self.events.send(HubEvent::MethodCall {
                    name,
                    rid,
                    payload: publish.payload,
                });
            }
            Inbound::Unknown => {
                tracing::debug!(topic = %publish.topic, "Ignoring publish on unknown topic");
            }
        }
    }
}
