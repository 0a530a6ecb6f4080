//! Kubernetes resource types read from the admitted pod and written into patches
//!
//! Only the fields the injector reads or emits are modelled. Unknown fields on
//! the admitted object are ignored when decoding; volume mounts keep theirs so
//! they can be copied verbatim.

use std::collections::BTreeMap;

use injector_common::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Deserializer, Serialize};

/// Decode `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Pod
// =============================================================================

/// The admitted workload
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// Metadata
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: PodMeta,
    /// Spec
    #[serde(default, deserialize_with = "null_as_default")]
    pub spec: PodSpec,
}

/// Pod metadata
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodMeta {
    /// Pod name (empty for pods created through `generateName`)
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Pod namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Annotations
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,
}

/// Pod spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Service account the pod runs as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Containers, in declaration order
    #[serde(default, deserialize_with = "null_as_default")]
    pub containers: Vec<Container>,
}

impl Pod {
    /// Decode a pod from the raw bytes of an admission request
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| Error::deserialization_for_kind("Pod", e.to_string()))
    }

    /// Pod name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Pod annotations
    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.metadata.annotations
    }

    /// Containers in declaration order
    pub fn containers(&self) -> &[Container] {
        &self.spec.containers
    }

    /// Whether a container with the given name exists
    pub fn has_container(&self, name: &str) -> bool {
        self.spec.containers.iter().any(|c| c.name == name)
    }

    /// Service account name, if one is declared and non-empty
    pub fn service_account_name(&self) -> Option<&str> {
        self.spec
            .service_account_name
            .as_deref()
            .filter(|sa| !sa.is_empty())
    }

    /// First volume mount across all containers mounted at `mount_path`
    pub fn find_volume_mount(&self, mount_path: &str) -> Option<&VolumeMount> {
        self.spec
            .containers
            .iter()
            .flat_map(|c| c.volume_mounts.iter())
            .find(|vm| vm.mount_path == mount_path)
    }
}

// =============================================================================
// Container
// =============================================================================

/// Container spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    /// Security context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    /// Ports
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub ports: Vec<ContainerPort>,
    /// Command
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub command: Vec<String>,
    /// Environment variables
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub env: Vec<EnvVar>,
    /// Args
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub args: Vec<String>,
    /// Readiness probe - removes from service endpoints when it fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,
    /// Liveness probe - restarts container when it fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    /// Resource requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Volume mounts
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub volume_mounts: Vec<VolumeMount>,
}

impl Container {
    /// Whether an env var with the given name is defined
    pub fn has_env(&self, name: &str) -> bool {
        self.env.iter().any(|e| e.name == name)
    }
}

#[cfg(test)]
impl Container {
    pub(crate) fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    pub(crate) fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    pub(crate) fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Container port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port number
    pub container_port: i32,
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ContainerPort {
    /// Create a named port
    pub fn named(name: impl Into<String>, container_port: i32) -> Self {
        Self {
            container_port,
            name: Some(name.into()),
        }
    }
}

/// Container security context
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    /// Whether a process can gain more privileges than its parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_privilege_escalation: Option<bool>,
}

// =============================================================================
// Environment
// =============================================================================

/// Environment variable: a literal value or a reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Literal value (mutually exclusive with `value_from`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Reference to a field or secret key (mutually exclusive with `value`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    /// Create an env var with a literal value
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Create an env var that references a secret key
    pub fn from_secret(
        name: impl Into<String>,
        secret_name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: None,
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name.into(),
                    key: key.into(),
                }),
            }),
        }
    }

    /// Create an env var populated from a pod field (downward API)
    pub fn from_field(name: impl Into<String>, field_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: field_path.into(),
                }),
                secret_key_ref: None,
            }),
        }
    }
}

/// Source for an env var value
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    /// Pod field reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<ObjectFieldSelector>,
    /// Secret key reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeySelector>,
}

/// Reference to a pod field
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFieldSelector {
    /// Field path (e.g. `status.podIP`)
    pub field_path: String,
}

/// Reference to a key within a secret
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SecretKeySelector {
    /// Secret name
    #[serde(default)]
    pub name: String,
    /// Key within the secret
    pub key: String,
}

// =============================================================================
// Probes and resources
// =============================================================================

/// Container probe
///
/// User containers carry exec, tcpSocket and grpc probes too, and the API
/// server drops zero-valued timings, so everything here is optional on read.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    /// HTTP GET action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGetAction>,
    /// Seconds after start before probing
    #[serde(default)]
    pub initial_delay_seconds: i32,
    /// Seconds before a probe times out
    #[serde(default)]
    pub timeout_seconds: i32,
    /// Seconds between probes
    #[serde(default)]
    pub period_seconds: i32,
    /// Consecutive failures before giving up
    #[serde(default)]
    pub failure_threshold: i32,
}

/// HTTP GET probe action
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HttpGetAction {
    /// Request path
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Port number or container port name
    pub port: IntOrString,
}

/// Compute resource requirements keyed by resource name (`cpu`, `memory`)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequirements {
    /// Resource limits
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Quantity>,
    /// Resource requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,
}

impl ResourceRequirements {
    /// Whether neither limits nor requests are set
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.requests.is_empty()
    }
}

// =============================================================================
// Volume mounts
// =============================================================================

/// Volume mount
///
/// Fields other than name and mount path are preserved as-is so a mount
/// copied from a user container round-trips unchanged.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name
    pub name: String,
    /// Mount path inside the container
    pub mount_path: String,
    /// Remaining fields (readOnly, subPath, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
