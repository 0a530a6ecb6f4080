//! Pod mutation handler
//!
//! Decodes the `AdmissionReview`, hands the raw pod to the injector and wraps
//! the result: no patch allows the pod unchanged, a patch is returned as
//! `JSONPatch`, and any error denies the admission with its message.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info, warn};

use injector_core::AdmissionContext;

use super::WebhookState;

/// Handle a mutating admission review for pods
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = mutate_pod(&state, &request).await;
    Json(response.into_review())
}

async fn mutate_pod(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let ctx = AdmissionContext::from_request(request);

    let Some(object) = &request.object else {
        debug!(uid = %ctx.uid, "no object in request, allowing unchanged");
        return AdmissionResponse::from(request);
    };

    let raw = match serde_json::to_vec(object) {
        Ok(raw) => raw,
        Err(e) => {
            error!(uid = %ctx.uid, error = %e, "failed to re-encode admitted object");
            return AdmissionResponse::from(request)
                .deny(format!("could not marshal raw object: {e}"));
        }
    };

    match state.injector.pod_patch_operations(&ctx, &raw).await {
        Ok(None) => AdmissionResponse::from(request),
        Ok(Some(ops)) => {
            let patch_ops = ops.len();
            match AdmissionResponse::from(request).with_patch(json_patch::Patch(ops)) {
                Ok(response) => {
                    info!(uid = %ctx.uid, patch_ops, "returning sidecar patch");
                    response
                }
                Err(e) => {
                    error!(uid = %ctx.uid, error = %e, "failed to serialize patch");
                    AdmissionResponse::from(request)
                        .deny(format!("patch serialization error: {e}"))
                }
            }
        }
        Err(e) => {
            if e.is_rejection() {
                warn!(
                    uid = %ctx.uid,
                    subject = e.subject().unwrap_or_default(),
                    error = %e,
                    "rejecting pod"
                );
            } else {
                error!(uid = %ctx.uid, error = %e, "sidecar injection failed");
            }
            AdmissionResponse::from(request).deny(e.to_string())
        }
    }
}
