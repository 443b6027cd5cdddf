//! HTTP server hosting the throttled demo API.

use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::middleware::{throttle_middleware, ThrottleState};
use crate::error::{Result, ThrottleError};

/// Build the demo API with the throttle applied to every route.
pub fn build_router(state: ThrottleState) -> Router {
    Router::new()
        .route("/api/values", get(list_values))
        .route("/api/values/:id", get(get_value))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(state, throttle_middleware)),
        )
}

async fn list_values() -> Json<Vec<&'static str>> {
    Json(vec!["value1", "value2"])
}

async fn get_value(Path(id): Path<u32>) -> Json<String> {
    Json(format!("value{}", id))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// HTTP server for the throttled API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    state: ThrottleState,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, state: ThrottleState) -> Self {
        Self { addr, state }
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind");
            e
        })?;

        info!(
            addr = %self.addr,
            name = %self.state.processor().name(),
            "Starting HTTP server with graceful shutdown"
        );

        let app = build_router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                ThrottleError::Io(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FloodgateConfig, StoreBackend, StoreConfig};
    use crate::store::{MemoryCounterStore, StoreFailurePolicy};
    use crate::throttle::ThrottleOptions;
    use axum::body::Body;
    use axum::extract::{ConnectInfo, Request};
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router(yaml: &str) -> Router {
        let throttle = ThrottleOptions::from_yaml(yaml).unwrap();
        let config = FloodgateConfig::new(
            StoreConfig::new(StoreBackend::Memory, StoreFailurePolicy::FailOpen),
            throttle,
        );
        let state = ThrottleState::from_config(&config, Arc::new(MemoryCounterStore::new())).unwrap();
        build_router(state)
    }

    fn from_address(uri: &str, ip: [u8; 4]) -> Request {
        let mut request = axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 40000))));
        request
    }

    #[tokio::test]
    async fn test_demo_routes() {
        let app = router("name: demo\n");

        let response = app
            .clone()
            .oneshot(axum::http::Request::builder().uri("/api/values/7").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"\"value7\"");

        let response = app
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_address_policy_through_router() {
        let app = router(
            r#"
mode: address
general_rules:
  - endpoint: "*"
    period: 1m
    limit: 5
client_policies:
  - client_id: "10.0.0.0/24"
    rules:
      - endpoint: "get:/api/values*"
        period: 1m
        limit: 1
"#,
        );

        let response = app.clone().oneshot(from_address("/api/values", [10, 0, 0, 3])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.clone().oneshot(from_address("/api/values", [10, 0, 0, 3])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // Outside the policy range the general rule applies
        for _ in 0..5 {
            let response = app.clone().oneshot(from_address("/api/values", [10, 0, 1, 3])).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.oneshot(from_address("/api/values", [10, 0, 1, 3])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_serve_with_immediate_shutdown() {
        let config = FloodgateConfig::new(
            StoreConfig::new(StoreBackend::Memory, StoreFailurePolicy::FailOpen),
            ThrottleOptions::default(),
        );
        let state = ThrottleState::from_config(&config, Arc::new(MemoryCounterStore::new())).unwrap();
        let server = HttpServer::new(SocketAddr::from(([127, 0, 0, 1], 0)), state);

        server.serve_with_shutdown(async {}).await.unwrap();
    }
}
