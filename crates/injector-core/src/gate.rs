//! Entry check: should this pod get a sidecar at all?

use injector_common::validation::validate_dns1123_label;
use injector_common::{Error, Result};

use crate::annotations::{keys, Annotations, ENABLED};
use crate::k8s::Pod;
use crate::sidecar::SIDECAR_CONTAINER_NAME;

/// Why a pod was left alone
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The opt-in annotation is missing or false
    NotEnabled,
    /// A sidecar container is already present
    AlreadyInjected,
}

/// Outcome of the gate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Eligibility {
    /// Leave the pod unchanged
    Skip(SkipReason),
    /// Inject a sidecar for this app id
    Inject {
        /// Validated app id
        app_id: String,
    },
}

/// Decide whether `pod` gets a sidecar
///
/// Returns a validation error when the pod opts in with an unusable app id.
pub fn check(pod: &Pod) -> Result<Eligibility> {
    let annotations = Annotations::new(pod.annotations());

    if !ENABLED.resolve(&annotations) {
        return Ok(Eligibility::Skip(SkipReason::NotEnabled));
    }
    if pod.has_container(SIDECAR_CONTAINER_NAME) {
        return Ok(Eligibility::Skip(SkipReason::AlreadyInjected));
    }

    let app_id = app_id(pod);
    validate_app_id(&app_id)?;
    Ok(Eligibility::Inject { app_id })
}

/// The `dapr.io/app-id` annotation if set, else the pod name
pub fn app_id(pod: &Pod) -> String {
    Annotations::new(pod.annotations())
        .non_empty(keys::APP_ID)
        .unwrap_or_else(|| pod.name())
        .to_string()
}

/// Check that `app_id` can name the sidecar's service (`<app-id>-dapr`)
pub fn validate_app_id(app_id: &str) -> Result<()> {
    if app_id.is_empty() {
        return Err(Error::validation_for_field(
            app_id,
            keys::APP_ID,
            "parameter app-id cannot be empty",
        ));
    }

    let service_name = format!("{app_id}-dapr");
    validate_dns1123_label(&service_name).map_err(|reason| {
        Error::validation_for_field(
            app_id,
            keys::APP_ID,
            format!("invalid app id (input: {app_id}, service: {service_name}): {reason}"),
        )
    })
}
