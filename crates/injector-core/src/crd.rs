//! Control-plane `Configuration` custom resource
//!
//! Only the mTLS section is modelled. Other sections of a live object (tracing,
//! metrics, access control) are ignored when decoding.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a dapr.io/v1alpha1 Configuration
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dapr.io",
    version = "v1alpha1",
    kind = "Configuration",
    plural = "configurations",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSpec {
    /// Mutual TLS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtls: Option<MtlsSpec>,
}

/// Mutual TLS settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MtlsSpec {
    /// Whether sidecars talk to each other over mTLS
    #[serde(default)]
    pub enabled: bool,

    /// Lifetime of workload certificates (e.g. "24h")
    #[serde(
        default,
        rename = "workloadCertTTL",
        skip_serializing_if = "Option::is_none"
    )]
    pub workload_cert_ttl: Option<String>,

    /// Tolerated clock skew when validating certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_clock_skew: Option<String>,
}

impl Configuration {
    /// The mTLS flag; an object without an mTLS section has it off
    pub fn mtls_enabled(&self) -> bool {
        self.spec.mtls.as_ref().is_some_and(|m| m.enabled)
    }
}
