//! Common types for the sidecar injector: errors, validation and telemetry

#![deny(missing_docs)]

pub mod error;
pub mod telemetry;
pub mod validation;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default port for the admission webhook HTTPS server
pub const DEFAULT_WEBHOOK_PORT: u16 = 4000;

/// Namespace the control plane (injector, placement, sentry) runs in by default
pub const DEFAULT_CONTROL_PLANE_NAMESPACE: &str = "dapr-system";
