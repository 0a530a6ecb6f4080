//! The injection pipeline
//!
//! `gate -> annotations -> trust -> sidecar -> patch`, run once per admission
//! request. The [`Injector`] holds only immutable configuration and shared
//! lookup sources, so one instance serves every request concurrently.

use std::sync::Arc;

use json_patch::PatchOperation;
use kube::core::admission::AdmissionRequest;
use kube::Resource;
use tracing::{debug, info, warn};

use injector_common::{Result, DEFAULT_CONTROL_PLANE_NAMESPACE};

use crate::annotations::{Annotations, ResolvedConfig, SidecarConfig};
use crate::gate::{self, Eligibility};
use crate::k8s::Pod;
use crate::patch;
use crate::sidecar::{
    ControlPlaneAddresses, PullPolicy, SidecarBuilder, SERVICE_ACCOUNT_TOKEN_MOUNT_PATH,
};
use crate::trust::{
    MtlsPolicySource, TrustBundleSource, TrustFailurePolicy, TrustResolver, TrustSubject,
};

/// Process-wide injector settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectorConfig {
    /// Sidecar image reference
    pub sidecar_image: String,
    /// Sidecar image pull policy
    pub image_pull_policy: PullPolicy,
    /// Namespace the control plane runs in
    pub control_plane_namespace: String,
    /// Namespace to read the trust bundle from; `None` means the pod's namespace
    pub trust_bundle_namespace: Option<String>,
    /// How failed trust lookups are handled
    pub trust_failure_policy: TrustFailurePolicy,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            sidecar_image: String::new(),
            image_pull_policy: PullPolicy::default(),
            control_plane_namespace: DEFAULT_CONTROL_PLANE_NAMESPACE.to_string(),
            trust_bundle_namespace: None,
            trust_failure_policy: TrustFailurePolicy::default(),
        }
    }
}

/// Request metadata carried through for logging
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdmissionContext {
    /// Request UID
    pub uid: String,
    /// Kind of the admitted object
    pub kind: String,
    /// Namespace of the admitted object
    pub namespace: String,
    /// Name of the admitted object (may be empty)
    pub name: String,
    /// Operation (CREATE, UPDATE, ...)
    pub operation: String,
    /// Requesting user
    pub user: String,
}

impl AdmissionContext {
    /// Extract the logging context from an admission request
    pub fn from_request<T: Resource>(request: &AdmissionRequest<T>) -> Self {
        Self {
            uid: request.uid.clone(),
            kind: request.kind.kind.clone(),
            namespace: request.namespace.clone().unwrap_or_default(),
            name: request.name.clone(),
            operation: format!("{:?}", request.operation).to_uppercase(),
            user: request.user_info.username.clone().unwrap_or_default(),
        }
    }
}

/// Computes sidecar injection patches
pub struct Injector {
    config: InjectorConfig,
    control_plane: ControlPlaneAddresses,
    trust: TrustResolver,
}

impl Injector {
    /// Create an injector over the given lookup sources
    pub fn new(
        config: InjectorConfig,
        policy: Arc<dyn MtlsPolicySource>,
        bundles: Arc<dyn TrustBundleSource>,
    ) -> Self {
        let control_plane = ControlPlaneAddresses::for_namespace(&config.control_plane_namespace);
        let trust = TrustResolver::new(policy, bundles, config.trust_failure_policy);
        Self {
            config,
            control_plane,
            trust,
        }
    }

    /// Compute the patch for a raw pod object
    ///
    /// Returns `Ok(None)` when the pod is left alone (not opted in, or
    /// already injected). Errors mean the admission should be denied.
    pub async fn pod_patch_operations(
        &self,
        ctx: &AdmissionContext,
        raw: &[u8],
    ) -> Result<Option<Vec<PatchOperation>>> {
        info!(
            kind = %ctx.kind,
            namespace = %ctx.namespace,
            name = %ctx.name,
            uid = %ctx.uid,
            operation = %ctx.operation,
            user = %ctx.user,
            "admission request"
        );

        let pod = Pod::from_slice(raw)?;
        let app_id = match gate::check(&pod)? {
            Eligibility::Skip(reason) => {
                debug!(uid = %ctx.uid, reason = ?reason, "skipping sidecar injection");
                return Ok(None);
            }
            Eligibility::Inject { app_id } => app_id,
        };

        let ResolvedConfig { config, warnings } =
            SidecarConfig::resolve(&Annotations::new(pod.annotations()))?;
        for warning in &warnings {
            warn!(
                uid = %ctx.uid,
                annotation = warning.key,
                value = %warning.value,
                error = %warning.reason,
                "invalid annotation value, feature disabled"
            );
        }

        let namespace = if ctx.namespace.is_empty() {
            pod.metadata.namespace.as_deref().unwrap_or_default()
        } else {
            ctx.namespace.as_str()
        };
        let subject = TrustSubject {
            namespace,
            bundle_namespace: self
                .config
                .trust_bundle_namespace
                .as_deref()
                .unwrap_or(namespace),
            service_account: pod.service_account_name(),
        };
        let trust = self.trust.resolve(&subject).await?;

        let sidecar = SidecarBuilder::new(&config, &app_id, namespace)
            .image(&self.config.sidecar_image, self.config.image_pull_policy)
            .control_plane(self.control_plane.clone())
            .token_mount(pod.find_volume_mount(SERVICE_ACCOUNT_TOKEN_MOUNT_PATH))
            .trust(&trust)
            .build();

        let ops = patch::assemble(pod.containers(), &sidecar, &patch::port_env(&config.ports))?;

        info!(
            uid = %ctx.uid,
            app_id = %app_id,
            mtls = trust.is_available(),
            patch_ops = ops.len(),
            "injecting sidecar"
        );
        Ok(Some(ops))
    }
}
