//! Sidecar container construction
//!
//! [`SidecarBuilder`] turns a resolved [`SidecarConfig`] plus per-request
//! facts (app id, namespace, trust material, token mount) into the `daprd`
//! container spec. Output is deterministic: the same inputs always produce the
//! same argument and env ordering.

use std::fmt;

use injector_common::DEFAULT_CONTROL_PLANE_NAMESPACE;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::annotations::{ProbeTimings, SidecarConfig};
use crate::k8s::{
    Container, ContainerPort, EnvVar, HttpGetAction, Probe, SecurityContext, VolumeMount,
};
use crate::trust::TrustMaterial;

/// Reserved sidecar container name; its presence marks a pod as injected
pub const SIDECAR_CONTAINER_NAME: &str = "daprd";

/// Sidecar entrypoint
pub const SIDECAR_COMMAND: &str = "/daprd";

/// HTTP API port name
pub const HTTP_PORT_NAME: &str = "dapr-http";
/// gRPC API port name
pub const GRPC_PORT_NAME: &str = "dapr-grpc";
/// Internal gRPC port name
pub const INTERNAL_GRPC_PORT_NAME: &str = "dapr-internal";
/// Metrics port name
pub const METRICS_PORT_NAME: &str = "dapr-metrics";

/// Path where Kubernetes mounts the service account token
pub const SERVICE_ACCOUNT_TOKEN_MOUNT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Key holding a token in API/app token secrets
pub const TOKEN_SECRET_KEY: &str = "token";

/// Sidecar API version segment of the health path
pub const API_VERSION: &str = "v1.0";
/// Health endpoint
pub const HEALTHZ_ENDPOINT: &str = "healthz";

/// Env var names set on the sidecar
pub mod env {
    /// Pod IP, from the downward API
    pub const HOST_IP: &str = "DAPR_HOST_IP";
    /// Workload namespace
    pub const NAMESPACE: &str = "NAMESPACE";
    /// Root certificate
    pub const TRUST_ANCHORS: &str = "DAPR_TRUST_ANCHORS";
    /// Issuer certificate chain
    pub const CERT_CHAIN: &str = "DAPR_CERT_CHAIN";
    /// Issuer key
    pub const CERT_KEY: &str = "DAPR_CERT_KEY";
    /// `<namespace>:<serviceAccountName>`
    pub const SENTRY_LOCAL_IDENTITY: &str = "SENTRY_LOCAL_IDENTITY";
    /// Token the sidecar requires on its API
    pub const API_TOKEN: &str = "DAPR_API_TOKEN";
    /// Token the sidecar presents to the app
    pub const APP_API_TOKEN: &str = "APP_API_TOKEN";
}

const PLACEMENT_SERVICE: &str = "dapr-placement-server";
const PLACEMENT_PORT: u16 = 50005;
const SENTRY_SERVICE: &str = "dapr-sentry";
const SENTRY_PORT: u16 = 80;
const API_SERVICE: &str = "dapr-api";
const API_PORT: u16 = 80;

// =============================================================================
// Inputs
// =============================================================================

/// Image pull policy for the sidecar
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PullPolicy {
    /// Always pull
    Always,
    /// Never pull
    Never,
    /// Pull when the image is missing
    #[default]
    IfNotPresent,
}

impl PullPolicy {
    /// Parse a policy name; anything unrecognised is `IfNotPresent`
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "Always" => PullPolicy::Always,
            "Never" => PullPolicy::Never,
            _ => PullPolicy::IfNotPresent,
        }
    }

    /// Kubernetes spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::Never => "Never",
            PullPolicy::IfNotPresent => "IfNotPresent",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addresses of the control-plane services the sidecar dials
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlPlaneAddresses {
    /// Placement service
    pub placement: String,
    /// Certificate authority
    pub sentry: String,
    /// Operator API
    pub api: String,
}

impl ControlPlaneAddresses {
    /// In-cluster addresses for a control plane running in `namespace`
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            placement: service_address(PLACEMENT_SERVICE, namespace, PLACEMENT_PORT),
            sentry: service_address(SENTRY_SERVICE, namespace, SENTRY_PORT),
            api: service_address(API_SERVICE, namespace, API_PORT),
        }
    }
}

impl Default for ControlPlaneAddresses {
    fn default() -> Self {
        Self::for_namespace(DEFAULT_CONTROL_PLANE_NAMESPACE)
    }
}

fn service_address(service: &str, namespace: &str, port: u16) -> String {
    format!("{service}.{namespace}.svc.cluster.local:{port}")
}

/// Join path segments into an absolute URL path
pub fn format_probe_path(segments: &[&str]) -> String {
    let joined = segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

// =============================================================================
// Builder
// =============================================================================

/// Builds the sidecar container
#[derive(Clone, Debug)]
pub struct SidecarBuilder<'a> {
    config: &'a SidecarConfig,
    app_id: &'a str,
    namespace: &'a str,
    image: &'a str,
    pull_policy: PullPolicy,
    control_plane: ControlPlaneAddresses,
    token_mount: Option<VolumeMount>,
    trust: Option<&'a TrustMaterial>,
}

impl<'a> SidecarBuilder<'a> {
    /// Start a sidecar for `app_id` in the workload namespace `namespace`
    pub fn new(config: &'a SidecarConfig, app_id: &'a str, namespace: &'a str) -> Self {
        Self {
            config,
            app_id,
            namespace,
            image: "",
            pull_policy: PullPolicy::default(),
            control_plane: ControlPlaneAddresses::default(),
            token_mount: None,
            trust: None,
        }
    }

    /// Set the image and pull policy
    pub fn image(mut self, image: &'a str, pull_policy: PullPolicy) -> Self {
        self.image = image;
        self.pull_policy = pull_policy;
        self
    }

    /// Set the control-plane addresses
    pub fn control_plane(mut self, addresses: ControlPlaneAddresses) -> Self {
        self.control_plane = addresses;
        self
    }

    /// Mount the service account token the way the app containers do
    pub fn token_mount(mut self, mount: Option<&VolumeMount>) -> Self {
        self.token_mount = mount.cloned();
        self
    }

    /// Attach trust material; mTLS is configured only if it is available
    pub fn trust(mut self, trust: &'a TrustMaterial) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Produce the container spec
    pub fn build(self) -> Container {
        let config = self.config;
        let ports = &config.ports;

        let mut args = self.base_args();
        let mut env_vars = vec![
            EnvVar::from_field(env::HOST_IP, "status.podIP"),
            EnvVar::literal(env::NAMESPACE, self.namespace),
        ];

        if config.log_as_json {
            args.push("--log-as-json".to_string());
        }
        if config.enable_profiling {
            args.push("--enable-profiling".to_string());
        }
        if let Some(trust) = self.trust.filter(|t| t.is_available()) {
            args.push("--enable-mtls".to_string());
            env_vars.extend([
                EnvVar::literal(env::TRUST_ANCHORS, trust.bundle.root_cert.as_str()),
                EnvVar::literal(env::CERT_CHAIN, trust.bundle.cert_chain.as_str()),
                EnvVar::literal(env::CERT_KEY, trust.bundle.cert_key.as_str()),
                EnvVar::literal(env::SENTRY_LOCAL_IDENTITY, trust.identity.as_str()),
            ]);
        }
        if config.app_ssl {
            args.push("--app-ssl".to_string());
        }
        if let Some(secret) = &config.api_token_secret {
            env_vars.push(EnvVar::from_secret(env::API_TOKEN, secret, TOKEN_SECRET_KEY));
        }
        if let Some(secret) = &config.app_token_secret {
            env_vars.push(EnvVar::from_secret(env::APP_API_TOKEN, secret, TOKEN_SECRET_KEY));
        }

        Container {
            name: SIDECAR_CONTAINER_NAME.to_string(),
            image: self.image.to_string(),
            image_pull_policy: Some(self.pull_policy.as_str().to_string()),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(false),
            }),
            ports: vec![
                ContainerPort::named(HTTP_PORT_NAME, ports.http),
                ContainerPort::named(GRPC_PORT_NAME, ports.grpc),
                ContainerPort::named(INTERNAL_GRPC_PORT_NAME, ports.internal_grpc),
                ContainerPort::named(METRICS_PORT_NAME, ports.metrics),
            ],
            command: vec![SIDECAR_COMMAND.to_string()],
            env: env_vars,
            args,
            readiness_probe: Some(health_probe(ports.http, &config.readiness)),
            liveness_probe: Some(health_probe(ports.http, &config.liveness)),
            resources: config.resources.clone(),
            volume_mounts: self.token_mount.into_iter().collect(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        let config = self.config;
        let app_port = if config.app_port > 0 {
            config.app_port.to_string()
        } else {
            String::new()
        };

        [
            ("--mode", "kubernetes".to_string()),
            ("--dapr-http-port", config.ports.http.to_string()),
            ("--dapr-grpc-port", config.ports.grpc.to_string()),
            ("--dapr-internal-grpc-port", config.ports.internal_grpc.to_string()),
            ("--app-port", app_port),
            ("--app-id", self.app_id.to_string()),
            ("--control-plane-address", self.control_plane.api.clone()),
            ("--app-protocol", config.app_protocol.clone()),
            ("--placement-host-address", self.control_plane.placement.clone()),
            ("--config", config.config.clone()),
            ("--log-level", config.log_level.clone()),
            ("--app-max-concurrency", config.max_concurrency.to_string()),
            ("--sentry-address", self.control_plane.sentry.clone()),
            ("--metrics-port", config.ports.metrics.to_string()),
            (
                "--dapr-http-max-request-size",
                config.max_request_body_size.to_string(),
            ),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_string(), value])
        .collect()
    }
}

fn health_probe(port: i32, timings: &ProbeTimings) -> Probe {
    Probe {
        http_get: Some(HttpGetAction {
            path: format_probe_path(&[API_VERSION, HEALTHZ_ENDPOINT]),
            port: IntOrString::Int(port),
        }),
        initial_delay_seconds: timings.initial_delay_seconds,
        timeout_seconds: timings.timeout_seconds,
        period_seconds: timings.period_seconds,
        failure_threshold: timings.failure_threshold,
    }
}
