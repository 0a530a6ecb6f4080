//! Admission webhook routes
//!
//! - `POST /mutate`: pod mutation (`AdmissionReview` in, `AdmissionReview` out)
//! - `GET /healthz`: liveness

mod pod;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use injector_core::Injector;

pub use pod::mutate_handler;

/// Shared state for webhook handlers
pub struct WebhookState {
    /// The injection pipeline
    pub injector: Injector,
}

impl WebhookState {
    /// Wrap an injector
    pub fn new(injector: Injector) -> Self {
        Self { injector }
    }
}

/// Build the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
