//! Sidecar injection pipeline
//!
//! Turns an admitted pod into the JSON patch that attaches a `daprd` sidecar:
//!
//! - [`gate`]: is the pod opted in and not yet injected, with a usable app id?
//! - [`annotations`]: typed, defaulted sidecar settings
//! - [`trust`]: mTLS policy flag and trust bundle lookups
//! - [`sidecar`]: the sidecar container spec
//! - [`patch`]: the ordered `add` operations
//!
//! [`Injector`] runs them in that order for each admission request.

#![deny(missing_docs)]

pub mod annotations;
pub mod crd;
pub mod gate;
pub mod injector;
pub mod k8s;
pub mod patch;
pub mod quantity;
pub mod sidecar;
pub mod trust;

pub use injector::{AdmissionContext, Injector, InjectorConfig};
pub use sidecar::{PullPolicy, SIDECAR_CONTAINER_NAME};
pub use trust::{
    KubeMtlsPolicySource, KubeTrustBundleSource, MtlsPolicySource, TrustBundleSource,
    TrustFailurePolicy,
};
