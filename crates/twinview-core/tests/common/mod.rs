// In-memory hub used by the session, synchronizer, and agent tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use twinview_api::SharedAccessSignature;
use twinview_core::model::merge_patch;
use twinview_core::{
    Connected, CoreError, DeviceIdentity, HubConnection, HubConnector, HubReply, InboundEvent,
    MethodResponse, SessionConfig,
};

pub fn identity() -> DeviceIdentity {
    DeviceIdentity::new("dev1", "S1", "SzE=".into()).unwrap()
}

/// Shared state of the fake hub, inspectable from tests.
pub struct FakeHub {
    pub reported: Mutex<Value>,
    pub desired: Mutex<Value>,
    pub reported_version: Mutex<i64>,
    pub patches: Mutex<Vec<Value>>,
    pub telemetry: Mutex<Vec<Value>>,
    pub method_responses: Mutex<Vec<(String, MethodResponse)>>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub patch_status: AtomicU16,
    /// When set, twin fetches fail with a transport error.
    pub fail_get: AtomicBool,
    pub connected_host: Mutex<Option<String>>,
    events: Mutex<Option<mpsc::UnboundedSender<InboundEvent>>>,
    gate: watch::Sender<bool>,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            reported: Mutex::new(json!({})),
            desired: Mutex::new(json!({ "$version": 1 })),
            reported_version: Mutex::new(1),
            patches: Mutex::new(Vec::new()),
            telemetry: Mutex::new(Vec::new()),
            method_responses: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            patch_status: AtomicU16::new(204),
            fail_get: AtomicBool::new(false),
            connected_host: Mutex::new(None),
            events: Mutex::new(None),
            gate,
        })
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn HubConnector> {
        Arc::new(FakeConnector {
            hub: Arc::clone(self),
        })
    }

    /// Hold reported writes until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Deliver an inbound event as if the hub had sent it.
    pub fn push(&self, event: InboundEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            tx.send(event).unwrap();
        }
    }

    pub fn push_desired(&self, version: i64, payload: Value) {
        self.push(InboundEvent::DesiredPatch {
            version: Some(version),
            payload: Bytes::from(serde_json::to_vec(&payload).unwrap()),
        });
    }

    /// Simulate a transport fault.
    pub fn drop_connection(&self, error: CoreError) {
        if let Some(tx) = self.events.lock().unwrap().take() {
            let _ = tx.send(InboundEvent::Disconnected { error: Some(error) });
        }
    }

    pub fn patch_log(&self) -> Vec<Value> {
        self.patches.lock().unwrap().clone()
    }

    /// Wait until `check` holds, failing the test after two seconds.
    pub async fn wait_for(&self, what: &str, check: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !check(self) {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn twin_document(&self) -> Value {
        let mut reported = self.reported.lock().unwrap().clone();
        reported["$version"] = json!(*self.reported_version.lock().unwrap());
        json!({
            "desired": self.desired.lock().unwrap().clone(),
            "reported": reported,
        })
    }
}

struct FakeConnector {
    hub: Arc<FakeHub>,
}

#[async_trait]
impl HubConnector for FakeConnector {
    async fn connect(
        &self,
        hub_host: &str,
        device_id: &str,
        sas: &SharedAccessSignature,
        _config: &SessionConfig,
    ) -> Result<Connected, CoreError> {
        assert_eq!(sas.resource(), format!("{hub_host}/devices/{device_id}"));
        self.hub.connects.fetch_add(1, Ordering::SeqCst);
        *self.hub.connected_host.lock().unwrap() = Some(hub_host.to_owned());

        let (tx, events) = mpsc::unbounded_channel();
        *self.hub.events.lock().unwrap() = Some(tx);
        Ok(Connected {
            connection: Arc::new(FakeConnection {
                hub: Arc::clone(&self.hub),
            }),
            events,
        })
    }
}

struct FakeConnection {
    hub: Arc<FakeHub>,
}

#[async_trait]
impl HubConnection for FakeConnection {
    async fn get_twin(&self) -> Result<HubReply, CoreError> {
        if self.hub.fail_get.load(Ordering::SeqCst) {
            return Err(CoreError::Network {
                message: "twin fetch timed out".into(),
            });
        }
        Ok(HubReply {
            status: 200,
            version: None,
            body: Bytes::from(serde_json::to_vec(&self.hub.twin_document()).unwrap()),
        })
    }

    async fn patch_reported(&self, patch: Bytes) -> Result<HubReply, CoreError> {
        let patch: Value = serde_json::from_slice(&patch).unwrap();
        self.hub.patches.lock().unwrap().push(patch.clone());

        let mut gate = self.hub.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let status = self.hub.patch_status.load(Ordering::SeqCst);
        if status != 204 {
            return Ok(HubReply {
                status,
                version: None,
                body: Bytes::from_static(br#"{"message":"rejected"}"#),
            });
        }

        merge_patch(&mut self.hub.reported.lock().unwrap(), &patch);
        let version = {
            let mut v = self.hub.reported_version.lock().unwrap();
            *v += 1;
            *v
        };
        Ok(HubReply {
            status,
            version: Some(version),
            body: Bytes::new(),
        })
    }

    async fn send_telemetry(&self, payload: Bytes) -> Result<(), CoreError> {
        let payload: Value = serde_json::from_slice(&payload).unwrap();
        self.hub.telemetry.lock().unwrap().push(payload);
        Ok(())
    }

    async fn respond_to_method(&self, rid: &str, response: &MethodResponse) -> Result<(), CoreError> {
        self.hub
            .method_responses
            .lock()
            .unwrap()
            .push((rid.to_owned(), response.clone()));
        Ok(())
    }

    async fn close(&self) {
        self.hub.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.hub.events.lock().unwrap().take() {
            let _ = tx.send(InboundEvent::Disconnected { error: None });
        }
    }
}
