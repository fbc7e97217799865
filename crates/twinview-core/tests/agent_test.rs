#![allow(clippy::unwrap_used)]

// End-to-end device workflow: provision against wiremock DPS, then connect
// and synchronize over the in-memory hub.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use twinview_api::DpsClient;
use twinview_core::{
    ConnectRequest, CoreError, CredentialResolver, DeviceAgent, ProvisioningClient,
    ProvisioningConfig, SessionConfig, SessionState, StaticTokenSupplier,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::FakeHub;

// ── Helpers ─────────────────────────────────────────────────────────

fn agent(server: &MockServer, hub: &std::sync::Arc<FakeHub>) -> DeviceAgent {
    let config = ProvisioningConfig {
        endpoint: None,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        budget: Duration::from_secs(1),
    };
    let dps = DpsClient::with_client(reqwest::Client::new(), server.uri().parse().unwrap());
    DeviceAgent::new(
        CredentialResolver::offline(),
        ProvisioningClient::with_dps(dps, config),
        hub.connector(),
        SessionConfig::default(),
    )
}

fn request() -> ConnectRequest {
    ConnectRequest {
        device_id: "dev1".into(),
        scope_id: Some("S1".into()),
        symmetric_key: Some(SecretString::from("a2V5")),
        hub_host: None,
    }
}

fn supplier() -> StaticTokenSupplier {
    StaticTokenSupplier::new(SecretString::from("unused"))
}

async fn mount_assignment(server: &MockServer, status: &str, hub: Option<&str>) {
    Mock::given(method("PUT"))
        .and(path("/S1/registrations/dev1/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "operationId": "op-1",
            "status": status,
            "registrationState": { "assignedHub": hub }
        })))
        .mount(server)
        .await;
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_provisions_and_synchronizes() {
    let server = MockServer::start().await;
    mount_assignment(&server, "assigned", Some("hub-a.example.net")).await;
    let hub = FakeHub::new();
    *hub.desired.lock().unwrap() = json!({ "interval": 15, "$version": 3 });

    let agent = agent(&server, &hub);
    let sync = agent.connect(&request(), &supplier()).await.unwrap();

    assert_eq!(hub.connected_host.lock().unwrap().as_deref(), Some("hub-a.example.net"));
    assert_eq!(sync.session().state(), SessionState::Connected);
    assert_eq!(sync.state().desired_version, 3);
    assert!(agent.current().await.is_some());
}

#[tokio::test]
async fn test_connect_with_known_hub_skips_provisioning() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    let hub = FakeHub::new();

    let mut req = request();
    req.hub_host = Some("hub-direct.example.net".into());
    agent(&server, &hub).connect(&req, &supplier()).await.unwrap();

    assert_eq!(
        hub.connected_host.lock().unwrap().as_deref(),
        Some("hub-direct.example.net")
    );
}

#[tokio::test]
async fn test_failed_registration_is_not_assigned() {
    let server = MockServer::start().await;
    mount_assignment(&server, "failed", None).await;
    let hub = FakeHub::new();

    let err = agent(&server, &hub)
        .connect(&request(), &supplier())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NotAssigned { .. }), "got {err:?}");
    assert_eq!(hub.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reconnect_tears_down_previous_session() {
    let server = MockServer::start().await;
    mount_assignment(&server, "assigned", Some("hub-a.example.net")).await;
    let hub = FakeHub::new();
    let agent = agent(&server, &hub);

    let first = agent.connect(&request(), &supplier()).await.unwrap();
    let second = agent.connect(&request(), &supplier()).await.unwrap();

    assert_eq!(first.session().state(), SessionState::Disconnected);
    assert_eq!(second.session().state(), SessionState::Connected);
    assert_eq!(hub.connects.load(Ordering::SeqCst), 2);
    assert_eq!(hub.closes.load(Ordering::SeqCst), 1);

    agent.disconnect().await;
    agent.disconnect().await;
    assert_eq!(second.session().state(), SessionState::Disconnected);
    assert!(agent.current().await.is_none());
}

#[tokio::test]
async fn test_agent_stays_responsive_while_provisioning() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/S1/registrations/dev1/register"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "operationId": "op-1",
                    "status": "assigned",
                    "registrationState": { "assignedHub": "hub-a.example.net" }
                }))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let hub = FakeHub::new();
    let agent = agent(&server, &hub);
    let supplier = supplier();
    let request = request();

    let connecting = agent.connect(&request, &supplier);
    let observe = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let current = tokio::time::timeout(Duration::from_millis(100), agent.current()).await;
        let disconnected = tokio::time::timeout(Duration::from_millis(100), agent.disconnect()).await;
        (current, disconnected)
    };
    let (connected, (current, disconnected)) = tokio::join!(connecting, observe);

    assert!(current.unwrap().is_none(), "current() blocked behind provisioning");
    assert!(disconnected.is_ok(), "disconnect() blocked behind provisioning");
    let sync = connected.unwrap();
    assert_eq!(sync.session().state(), SessionState::Connected);
    assert!(agent.current().await.is_some());
}
