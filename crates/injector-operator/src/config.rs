//! Command-line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use injector_common::telemetry::{LogFormat, TelemetryConfig};
use injector_common::{Error, Result, DEFAULT_CONTROL_PLANE_NAMESPACE, DEFAULT_WEBHOOK_PORT};
use injector_core::trust::{DEFAULT_CONFIGURATION_NAME, TRUST_BUNDLE_SECRET};
use injector_core::{InjectorConfig, PullPolicy, TrustFailurePolicy};

use crate::server::ServerConfig;

/// Sidecar injector - mutating admission webhook for daprd
#[derive(Parser, Debug, Clone)]
#[command(name = "injector", version, about, long_about = None)]
pub struct InjectorArgs {
    /// HTTPS port for the admission webhook
    #[arg(long, env = "INJECTOR_PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    pub port: u16,

    /// PEM certificate served by the webhook
    #[arg(long, env = "TLS_CERT_FILE", default_value = "/dapr/cert/tls.crt")]
    pub tls_cert_file: PathBuf,

    /// PEM private key for the webhook certificate
    #[arg(long, env = "TLS_KEY_FILE", default_value = "/dapr/cert/tls.key")]
    pub tls_key_file: PathBuf,

    /// Image used for injected sidecars
    #[arg(long, env = "SIDECAR_IMAGE", default_value = "")]
    pub sidecar_image: String,

    /// Pull policy for injected sidecars (Always, Never, IfNotPresent)
    #[arg(long, env = "SIDECAR_IMAGE_PULL_POLICY", default_value = "IfNotPresent")]
    pub sidecar_image_pull_policy: String,

    /// Namespace the control plane runs in
    #[arg(long, env = "NAMESPACE", default_value = DEFAULT_CONTROL_PLANE_NAMESPACE)]
    pub namespace: String,

    /// Namespace holding the trust bundle secret (defaults to each pod's namespace)
    #[arg(long, env = "TRUST_BUNDLE_NAMESPACE")]
    pub trust_bundle_namespace: Option<String>,

    /// Name of the trust bundle secret
    #[arg(long, env = "TRUST_BUNDLE_SECRET", default_value = TRUST_BUNDLE_SECRET)]
    pub trust_bundle_secret: String,

    /// Configuration object carrying the mTLS flag
    #[arg(long, env = "CONFIGURATION_NAME", default_value = DEFAULT_CONFIGURATION_NAME)]
    pub configuration_name: String,

    /// What to do when trust lookups fail: best-effort or fail-closed
    #[arg(long, env = "TRUST_FAILURE_POLICY", default_value = "best-effort")]
    pub trust_failure_policy: TrustFailurePolicy,

    /// Log output format: json or text
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl InjectorArgs {
    /// Injector settings for the pipeline
    pub fn injector_config(&self) -> Result<InjectorConfig> {
        if self.sidecar_image.trim().is_empty() {
            return Err(Error::config_for_field(
                "sidecar-image",
                "a sidecar image is required",
            ));
        }
        if self.namespace.is_empty() {
            return Err(Error::config_for_field(
                "namespace",
                "control plane namespace must not be empty",
            ));
        }

        Ok(InjectorConfig {
            sidecar_image: self.sidecar_image.clone(),
            image_pull_policy: PullPolicy::from_str_lossy(&self.sidecar_image_pull_policy),
            control_plane_namespace: self.namespace.clone(),
            trust_bundle_namespace: self
                .trust_bundle_namespace
                .clone()
                .filter(|ns| !ns.is_empty()),
            trust_failure_policy: self.trust_failure_policy,
        })
    }

    /// HTTPS listener settings
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], self.port)),
            cert_file: self.tls_cert_file.clone(),
            key_file: self.tls_key_file.clone(),
        }
    }

    /// Logging settings
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            format: self.log_format,
            ..TelemetryConfig::default()
        }
    }
}
