//! Axum middleware that applies the throttle to every request.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use super::identity::RequestNormalizer;
use crate::config::FloodgateConfig;
use crate::error::{Result, ThrottleError};
use crate::store::{CounterStore, StoreFailurePolicy};
use crate::throttle::{ThrottleDecision, ThrottleProcessor, ThrottleRule};

/// Shared state for [`throttle_middleware`].
#[derive(Clone)]
pub struct ThrottleState {
    processor: Arc<ThrottleProcessor>,
    normalizer: Arc<dyn RequestNormalizer>,
    status: StatusCode,
    message: Option<String>,
    failure_policy: StoreFailurePolicy,
}

impl ThrottleState {
    pub fn new(
        processor: Arc<ThrottleProcessor>,
        normalizer: Arc<dyn RequestNormalizer>,
        status_code: u16,
        message: Option<String>,
        failure_policy: StoreFailurePolicy,
    ) -> Result<Self> {
        let status = StatusCode::from_u16(status_code).map_err(|_| {
            ThrottleError::Config(format!("{} is not a valid HTTP status code", status_code))
        })?;

        Ok(Self {
            processor,
            normalizer,
            status,
            message: message.filter(|m| !m.trim().is_empty()),
            failure_policy,
        })
    }

    /// Build the processor and state described by the configuration.
    pub fn from_config(config: &FloodgateConfig, store: Arc<dyn CounterStore>) -> Result<Self> {
        let processor = ThrottleProcessor::new(&config.throttle, store)?;

        Self::new(
            Arc::new(processor),
            Arc::new(config.identity_source()),
            config.throttle.http_status_code,
            config.throttle.quota_exceeded_message.clone(),
            config.store.failure_policy,
        )
    }

    pub fn processor(&self) -> &Arc<ThrottleProcessor> {
        &self.processor
    }

    /// The response sent when `rule` rejects a request.
    pub fn quota_exceeded(&self, rule: &ThrottleRule) -> Response {
        let message = quota_exceeded_message(self.message.as_deref(), rule);
        (self.status, Json(json!({ "message": message }))).into_response()
    }
}

/// Render the rejection text. A custom template may use the `{limit}` and
/// `{period}` placeholders.
pub fn quota_exceeded_message(template: Option<&str>, rule: &ThrottleRule) -> String {
    match template {
        Some(template) => template
            .replace("{limit}", &rule.limit().to_string())
            .replace("{period}", rule.period()),
        None => format!(
            "API calls quota exceeded! maximum admitted {} per {}.",
            rule.limit(),
            rule.period()
        ),
    }
}

/// Throttle the request, passing it on only when admitted.
///
/// Counter store failures follow the configured [`StoreFailurePolicy`]; any
/// other error answers 500.
///
/// Use with [`axum::middleware::from_fn_with_state`].
pub async fn throttle_middleware(
    State(state): State<ThrottleState>,
    request: Request,
    next: Next,
) -> Response {
    let client_request = state.normalizer.normalize(&request);

    match state.processor.check(&client_request).await {
        Ok(ThrottleDecision::Rejected { rule, .. }) => state.quota_exceeded(rule),
        Ok(_) => next.run(request).await,
        Err(e) if !e.is_store_failure() => {
            error!(
                error = %e,
                client_id = %client_request.client_id,
                path = %client_request.path,
                "Throttle check failed unexpectedly"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "Internal server error." })),
            )
                .into_response()
        }
        Err(e) => match state.failure_policy {
            StoreFailurePolicy::FailOpen => {
                warn!(
                    error = %e,
                    client_id = %client_request.client_id,
                    path = %client_request.path,
                    "Counter store failed, admitting request"
                );
                next.run(request).await
            }
            StoreFailurePolicy::FailClosed => {
                error!(
                    error = %e,
                    client_id = %client_request.client_id,
                    path = %client_request.path,
                    "Counter store failed, rejecting request"
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "message": "Throttle unavailable, try again later." })),
                )
                    .into_response()
            }
        },
    }
}
