// ── Hub session ──
//
// Lifecycle for one device's connection to its assigned hub:
// `Disconnected -> Connecting -> Connected -> Disconnected`. No automatic
// reconnection: a transport fault moves straight to `Disconnected` and
// fires the disconnect notifier with the triggering error.
//
// The wire protocol sits behind `HubConnector`/`HubConnection`, so the
// session only deals in twin documents, acknowledgements, and events.

use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use twinview_api::SharedAccessSignature;
use twinview_api::sas::device_resource;

use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::model::{
    AckStatus, DesiredUpdate, DeviceIdentity, MethodInvocation, MethodResponse, TwinState,
};

/// Only this status acknowledges a reported-properties write.
const REPORTED_PATCH_ACCEPTED: u16 = 204;
const TWIN_GET_OK: u16 = 200;

const DISPATCH_DRAIN: Duration = Duration::from_secs(2);

// ── Transport capability ─────────────────────────────────────────────

/// A twin request's answer as seen above the wire protocol.
#[derive(Debug, Clone)]
pub struct HubReply {
    pub status: u16,
    pub version: Option<i64>,
    pub body: Bytes,
}

/// Unsolicited traffic from a live connection.
#[derive(Debug)]
pub enum InboundEvent {
    DesiredPatch {
        version: Option<i64>,
        payload: Bytes,
    },
    MethodCall {
        name: String,
        rid: String,
        payload: Bytes,
    },
    /// Final event. `error` is `None` when the close was requested locally.
    Disconnected { error: Option<CoreError> },
}

/// One live, authenticated connection to a hub.
#[async_trait]
pub trait HubConnection: Send + Sync {
    async fn get_twin(&self) -> Result<HubReply, CoreError>;
    async fn patch_reported(&self, patch: Bytes) -> Result<HubReply, CoreError>;
    async fn send_telemetry(&self, payload: Bytes) -> Result<(), CoreError>;
    async fn respond_to_method(&self, rid: &str, response: &MethodResponse) -> Result<(), CoreError>;
    /// Release the connection. Must be safe to call more than once.
    async fn close(&self);
}

/// A freshly established connection and its event stream.
pub struct Connected {
    pub connection: Arc<dyn HubConnection>,
    pub events: mpsc::UnboundedReceiver<InboundEvent>,
}

/// Opens connections to a hub.
#[async_trait]
pub trait HubConnector: Send + Sync {
    async fn connect(
        &self,
        hub_host: &str,
        device_id: &str,
        sas: &SharedAccessSignature,
        config: &SessionConfig,
    ) -> Result<Connected, CoreError>;
}

// ── Session state ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

type DesiredHandler = Box<dyn Fn(DesiredUpdate) + Send + Sync>;
type MethodHandler = Box<dyn Fn(MethodInvocation) -> MethodResponse + Send + Sync>;
type DisconnectHandler = Box<dyn Fn(Option<CoreError>) + Send + Sync>;

// ── HubSession ───────────────────────────────────────────────────────

/// Owns at most one live hub connection for one device identity.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Create with [`new`](Self::new),
/// then [`connect`](Self::connect).
#[derive(Clone)]
pub struct HubSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connector: Arc<dyn HubConnector>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    link: Mutex<Option<Link>>,
    on_desired: ArcSwapOption<DesiredHandler>,
    on_method: ArcSwapOption<MethodHandler>,
    on_disconnect: ArcSwapOption<DisconnectHandler>,
}

/// The live connection plus the task dispatching its events.
struct Link {
    hub_host: String,
    device_id: String,
    connection: Arc<dyn HubConnection>,
    dispatcher: JoinHandle<()>,
}

impl HubSession {
    pub fn new(connector: Arc<dyn HubConnector>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            inner: Arc::new(SessionInner {
                connector,
                config,
                state,
                link: Mutex::new(None),
                on_desired: ArcSwapOption::empty(),
                on_method: ArcSwapOption::empty(),
                on_disconnect: ArcSwapOption::empty(),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Host of the hub this session is connected to.
    pub async fn hub_host(&self) -> Option<String> {
        self.inner
            .link
            .lock()
            .await
            .as_ref()
            .map(|link| link.hub_host.clone())
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Authenticate to `hub_host` as `identity` and start dispatching events.
    ///
    /// Fails with [`CoreError::Validation`] if the session is not
    /// disconnected; tear the old connection down first.
    pub async fn connect(&self, hub_host: &str, identity: &DeviceIdentity) -> Result<(), CoreError> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Disconnected {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(CoreError::Validation {
                message: "session is already connected; disconnect before reconnecting".into(),
            });
        }

        let device_id = identity.device_id();
        info!(hub = hub_host, device_id, "Connecting hub session");

        let Connected { connection, events } = match self.open(hub_host, identity).await {
            Ok(connected) => connected,
            Err(e) => {
                self.inner.state.send_replace(SessionState::Disconnected);
                warn!(hub = hub_host, device_id, error = %e, "Hub connection failed");
                return Err(e);
            }
        };

        // The dispatcher takes this lock on a fault, so it cannot observe
        // the session before the link is in place. A dispatcher from an
        // earlier connection only ever clears its own link.
        let mut link = self.inner.link.lock().await;
        self.inner.state.send_replace(SessionState::Connected);
        let dispatcher = tokio::spawn(dispatch(
            Arc::downgrade(&self.inner),
            Arc::clone(&connection),
            events,
        ));
        *link = Some(Link {
            hub_host: hub_host.to_owned(),
            device_id: device_id.to_owned(),
            connection,
            dispatcher,
        });

        info!(hub = hub_host, device_id, "Hub session connected");
        Ok(())
    }

    async fn open(&self, hub_host: &str, identity: &DeviceIdentity) -> Result<Connected, CoreError> {
        let config = &self.inner.config;
        let ttl = chrono::Duration::from_std(config.token_ttl).map_err(|e| CoreError::Validation {
            message: format!("token lifetime out of range: {e}"),
        })?;
        let sas = SharedAccessSignature::sign(
            &device_resource(hub_host, identity.device_id()),
            identity.symmetric_key(),
            None,
            Utc::now() + ttl,
        )?;

        let timeout_secs = config.handshake_timeout.as_secs();
        tokio::time::timeout(
            config.handshake_timeout,
            self.inner
                .connector
                .connect(hub_host, identity.device_id(), &sas, config),
        )
        .await
        .map_err(|_| CoreError::Timeout { timeout_secs })?
    }

    /// Release the connection. Idempotent.
    ///
    /// The disconnect notifier fires only if this call performed the
    /// `Connected -> Disconnected` transition.
    pub async fn disconnect(&self) {
        let link = self.inner.link.lock().await.take();
        let transitioned = self.inner.mark_disconnected();

        if let Some(link) = link {
            debug!(hub = %link.hub_host, device_id = %link.device_id, "Closing hub session");
            link.connection.close().await;
            // The dispatcher exits after the connection's final event.
            if tokio::time::timeout(DISPATCH_DRAIN, link.dispatcher).await.is_err() {
                debug!("Event dispatcher still draining, detaching");
            }
        }

        if transitioned {
            info!("Hub session disconnected");
            self.inner.notify_disconnect(None);
        }
    }

    // ── Twin operations ──────────────────────────────────────────────

    /// Fetch the full twin document.
    pub async fn get_twin(&self) -> Result<TwinState, CoreError> {
        let connection = self.connection().await?;
        let reply = connection.get_twin().await?;
        if reply.status != TWIN_GET_OK {
            return Err(remote(&reply));
        }
        let doc: Value = serde_json::from_slice(&reply.body).map_err(|e| CoreError::decode(&e))?;
        TwinState::from_document(&doc)
    }

    /// Submit a partial reported-properties update.
    ///
    /// Succeeds only on the hub's explicit acceptance; every other status is
    /// a [`CoreError::Remote`]. Re-fetch the twin to observe the merged result.
    pub async fn update_twin(&self, patch: &Value) -> Result<AckStatus, CoreError> {
        let body = serde_json::to_vec(patch).map_err(|e| CoreError::decode(&e))?;
        let connection = self.connection().await?;
        let reply = connection.patch_reported(Bytes::from(body)).await?;
        if reply.status != REPORTED_PATCH_ACCEPTED {
            warn!(status = reply.status, "Reported-properties update not accepted");
            return Err(remote(&reply));
        }
        Ok(AckStatus {
            status: reply.status,
            version: reply.version,
        })
    }

    /// Publish one telemetry message. Not retried here.
    pub async fn send_telemetry(&self, payload: &Value) -> Result<(), CoreError> {
        let body = serde_json::to_vec(payload).map_err(|e| CoreError::decode(&e))?;
        let connection = self.connection().await?;
        connection.send_telemetry(Bytes::from(body)).await
    }

    // ── Handler registration ─────────────────────────────────────────

    /// Set the desired-property handler, replacing any previous one.
    /// Takes effect from the next delivered event.
    pub fn on_desired_property_change<F>(&self, handler: F)
    where
        F: Fn(DesiredUpdate) + Send + Sync + 'static,
    {
        self.inner
            .on_desired
            .store(Some(Arc::new(Box::new(handler) as DesiredHandler)));
    }

    /// Set the direct-method handler, replacing any previous one.
    /// Calls arriving with no handler are answered 501.
    pub fn on_direct_method<F>(&self, handler: F)
    where
        F: Fn(MethodInvocation) -> MethodResponse + Send + Sync + 'static,
    {
        self.inner
            .on_method
            .store(Some(Arc::new(Box::new(handler) as MethodHandler)));
    }

    /// Set the notifier called on each `Connected -> Disconnected` transition.
    /// Receives the triggering error, or `None` for a caller-initiated close.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(Option<CoreError>) + Send + Sync + 'static,
    {
        self.inner
            .on_disconnect
            .store(Some(Arc::new(Box::new(handler) as DisconnectHandler)));
    }

    async fn connection(&self) -> Result<Arc<dyn HubConnection>, CoreError> {
        let link = self.inner.link.lock().await;
        // A faulted link lingers until the dispatcher clears it.
        if *self.inner.state.borrow() != SessionState::Connected {
            return Err(CoreError::NotConnected);
        }
        link.as_ref()
            .map(|link| Arc::clone(&link.connection))
            .ok_or(CoreError::NotConnected)
    }
}

impl SessionInner {
    /// Move `Connected -> Disconnected`. Returns whether this call did it.
    fn mark_disconnected(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Connected {
                *state = SessionState::Disconnected;
                true
            } else {
                false
            }
        })
    }

    fn notify_disconnect(&self, error: Option<CoreError>) {
        if let Some(handler) = self.on_disconnect.load_full() {
            (**handler)(error);
        }
    }
}

fn remote(reply: &HubReply) -> CoreError {
    CoreError::Remote {
        status: reply.status,
        message: String::from_utf8_lossy(&reply.body).into_owned(),
    }
}

// ── Event dispatch ───────────────────────────────────────────────────

/// Deliver one connection's events in arrival order until it ends.
async fn dispatch(
    session: Weak<SessionInner>,
    connection: Arc<dyn HubConnection>,
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };

        match event {
            InboundEvent::DesiredPatch { version, payload } => {
                match inner.on_desired.load_full() {
                    Some(handler) => (**handler)(DesiredUpdate { version, payload }),
                    None => debug!(?version, "Desired update with no handler, dropping"),
                }
            }
            InboundEvent::MethodCall { name, rid, payload } => {
                let response = invoke_method(&inner, &name, &payload);
                debug!(method = %name, rid = %rid, status = response.status, "Answering direct method");
                if let Err(e) = connection.respond_to_method(&rid, &response).await {
                    warn!(method = %name, error = %e, "Failed to answer direct method");
                }
            }
            InboundEvent::Disconnected { error } => {
                let mut link = inner.link.lock().await;
                // `disconnect` may have taken this link already, and a
                // newer connection may have replaced it since.
                if !link
                    .as_ref()
                    .is_some_and(|link| Arc::ptr_eq(&link.connection, &connection))
                {
                    break;
                }
                link.take();
                let transitioned = inner.mark_disconnected();
                drop(link);

                if transitioned {
                    match error {
                        Some(ref e) => warn!(error = %e, "Hub session lost"),
                        None => info!("Hub session closed"),
                    }
                    inner.notify_disconnect(error);
                }
                break;
            }
        }
    }
}

fn invoke_method(inner: &SessionInner, name: &str, payload: &Bytes) -> MethodResponse {
    let Some(handler) = inner.on_method.load_full() else {
        return MethodResponse::not_implemented(name);
    };

    let payload = if payload.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => return MethodResponse::bad_request(&format!("payload is not JSON: {e}")),
        }
    };

    (**handler)(MethodInvocation {
        name: name.to_owned(),
        payload,
    })
}
