//! Twin proxy HTTP service.
//!
//! `GET /api/twin/:device_id` reads a hub-scoped SAS token from
//! `Authorization`, fetches the device twin from the hub named in the token,
//! and relays it. Every failure is a 500 carrying the hub's own JSON error
//! document when there is one, or a generic `{"Message": ...}` body.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use twinview_api::{HubServiceClient, SharedAccessSignature};

use crate::error::CliError;

const FALLBACK_MESSAGE: &str = "Error getting twin";

#[derive(Clone)]
pub struct ProxyState {
    hub: Arc<HubServiceClient>,
}

impl ProxyState {
    pub fn new(hub: HubServiceClient) -> Self {
        Self { hub: Arc::new(hub) }
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/api/twin/:device_id", get(get_twin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: ProxyState) -> Result<(), CliError> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Twin proxy listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down twin proxy");
        })
        .await?;
    Ok(())
}

async fn get_twin(
    State(state): State<ProxyState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        debug!(device_id, "Twin request without authorization");
        return failure(None);
    };

    let sas = match SharedAccessSignature::parse(token) {
        Ok(sas) => sas,
        Err(e) => {
            debug!(device_id, error = %e, "Unparseable SAS token");
            return failure(None);
        }
    };

    match state.hub.get_twin(&device_id, &sas).await {
        Ok(twin) => (StatusCode::OK, Json(twin)).into_response(),
        Err(twinview_api::Error::Remote { status, message }) => {
            warn!(device_id, hub = sas.hub_host(), status, "Hub rejected twin request");
            failure(serde_json::from_str::<Value>(&message).ok())
        }
        Err(e) => {
            warn!(device_id, hub = sas.hub_host(), error = %e, "Twin request failed");
            failure(None)
        }
    }
}

fn failure(body: Option<Value>) -> Response {
    let body = body.unwrap_or_else(|| json!({ "Message": FALLBACK_MESSAGE }));
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;
    use wiremock::matchers::{header as header_matcher, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const TOKEN: &str =
        "SharedAccessSignature sr=hub-a.azure-devices.net&sig=c2ln&se=4102444800&skn=service";

    fn app(hub: &MockServer) -> Router {
        let client =
            HubServiceClient::with_base_url(reqwest::Client::new(), hub.uri().parse().unwrap());
        router(ProxyState::new(client))
    }

    async fn call(app: Router, auth: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::get("/api/twin/dev1");
        if let Some(auth) = auth {
            request = request.header(header::AUTHORIZATION, auth);
        }
        let response = app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn relays_twin_from_hub() {
        let hub = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/twins/dev1"))
            .and(query_param("api-version", "2021-04-12"))
            .and(header_matcher("authorization", TOKEN))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "deviceId": "dev1", "x": 1 })),
            )
            .expect(1)
            .mount(&hub)
            .await;

        let (status, body) = call(app(&hub), Some(TOKEN)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "deviceId": "dev1", "x": 1 }));
    }

    #[tokio::test]
    async fn relays_hub_json_error_as_500() {
        let hub = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "Message": "ErrorCode:DeviceNotFound;dev1",
                "ExceptionMessage": ""
            })))
            .mount(&hub)
            .await;

        let (status, body) = call(app(&hub), Some(TOKEN)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["Message"], json!("ErrorCode:DeviceNotFound;dev1"));
    }

    #[tokio::test]
    async fn non_json_hub_error_uses_fallback_message() {
        let hub = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&hub)
            .await;

        let (status, body) = call(app(&hub), Some(TOKEN)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "Message": "Error getting twin" }));
    }

    #[tokio::test]
    async fn missing_authorization_is_500_without_hub_call() {
        let hub = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&hub)
            .await;

        let (status, body) = call(app(&hub), None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "Message": "Error getting twin" }));
    }

    #[tokio::test]
    async fn malformed_token_is_500() {
        let hub = MockServer::start().await;

        let (status, body) = call(app(&hub), Some("Bearer abc")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "Message": "Error getting twin" }));
    }
}
