//! JSON patch assembly
//!
//! Every operation is an RFC 6902 `add`. The sidecar goes in first, then each
//! original container receives the sidecar port env vars it doesn't already
//! define. Existing env values are never replaced.

use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use serde::Serialize;

use injector_common::Result;

use crate::annotations::SidecarPorts;
use crate::k8s::{Container, EnvVar};

/// Env var exposing the sidecar HTTP port to app containers
pub const HTTP_PORT_ENV: &str = "DAPR_HTTP_PORT";

/// Env var exposing the sidecar gRPC port to app containers
pub const GRPC_PORT_ENV: &str = "DAPR_GRPC_PORT";

// =============================================================================
// Paths
// =============================================================================

/// `/spec/containers`
pub fn containers_path() -> PointerBuf {
    PointerBuf::from_tokens(["spec", "containers"])
}

/// `/spec/containers/-`
pub fn container_append_path() -> PointerBuf {
    PointerBuf::from_tokens(["spec", "containers", "-"])
}

/// `/spec/containers/{index}/env`
pub fn env_path(index: usize) -> PointerBuf {
    let index = index.to_string();
    PointerBuf::from_tokens(["spec", "containers", index.as_str(), "env"])
}

/// `/spec/containers/{index}/env/-`
pub fn env_append_path(index: usize) -> PointerBuf {
    let index = index.to_string();
    PointerBuf::from_tokens(["spec", "containers", index.as_str(), "env", "-"])
}

// =============================================================================
// Operations
// =============================================================================

/// An `add` operation with a serialized value
pub fn add<T: Serialize + ?Sized>(path: PointerBuf, value: &T) -> Result<PatchOperation> {
    Ok(PatchOperation::Add(AddOperation {
        path,
        value: serde_json::to_value(value)?,
    }))
}

/// Env vars advertising the sidecar's API ports
pub fn port_env(ports: &SidecarPorts) -> Vec<EnvVar> {
    vec![
        EnvVar::literal(HTTP_PORT_ENV, ports.http.to_string()),
        EnvVar::literal(GRPC_PORT_ENV, ports.grpc.to_string()),
    ]
}

/// Operations adding `candidates` to the container at `index`
///
/// Candidates whose name the container already defines are skipped. A
/// container without env gets the whole list in one operation; otherwise
/// each missing var is appended on its own.
pub fn env_patch_operations(
    container: &Container,
    candidates: &[EnvVar],
    index: usize,
) -> Result<Vec<PatchOperation>> {
    if container.env.is_empty() {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![add(env_path(index), candidates)?]);
    }

    candidates
        .iter()
        .filter(|candidate| !container.has_env(&candidate.name))
        .map(|candidate| add(env_append_path(index), candidate))
        .collect()
}

/// Full patch: insert `sidecar` and merge `port_env` into each container
pub fn assemble(
    containers: &[Container],
    sidecar: &Container,
    port_env: &[EnvVar],
) -> Result<Vec<PatchOperation>> {
    if containers.is_empty() {
        return Ok(vec![add(containers_path(), &[sidecar])?]);
    }

    let mut ops = vec![add(container_append_path(), sidecar)?];
    for (index, container) in containers.iter().enumerate() {
        ops.extend(env_patch_operations(container, port_env, index)?);
    }
    Ok(ops)
}
