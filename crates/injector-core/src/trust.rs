//! Trust material resolution
//!
//! Two lookups feed the sidecar's mTLS settings: the cluster-wide policy flag
//! from the control-plane `Configuration`, and the trust bundle secret holding
//! the root certificate and issuer credentials. Both sit behind traits so the
//! pipeline can run against stubs.
//!
//! A lookup either succeeds, finds nothing (`NotConfigured`), or fails
//! (`Unavailable`). Under [`TrustFailurePolicy::BestEffort`] the last two are
//! treated alike: the policy falls back to enabled and the bundle to empty
//! material, which leaves mTLS off for the sidecar. Under
//! [`TrustFailurePolicy::FailClosed`] an `Unavailable` lookup aborts the
//! admission instead.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::{debug, error, info};

#[cfg(test)]
use mockall::automock;

use injector_common::{Error, Result};

use crate::crd::Configuration;

/// Name of the control-plane Configuration that carries the mTLS flag
pub const DEFAULT_CONFIGURATION_NAME: &str = "daprsystem";

/// Policy used when the Configuration can't be read or doesn't exist
pub const DEFAULT_MTLS_ENABLED: bool = true;

/// Secret holding the trust bundle
pub const TRUST_BUNDLE_SECRET: &str = "dapr-trust-bundle";

/// Secret key for the root certificate
pub const ROOT_CERT_KEY: &str = "ca.crt";

/// Secret key for the issuer certificate chain
pub const ISSUER_CERT_KEY: &str = "issuer.crt";

/// Secret key for the issuer private key
pub const ISSUER_KEY_KEY: &str = "issuer.key";

// =============================================================================
// Lookup results
// =============================================================================

/// Outcome of reading the mTLS policy flag
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyLookup {
    /// The Configuration exists and sets the flag
    Configured(bool),
    /// No Configuration with the expected name
    NotConfigured,
    /// The lookup itself failed
    Unavailable(String),
}

/// Root certificate and issuer credentials, PEM-encoded
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TrustBundle {
    /// Root certificate
    pub root_cert: String,
    /// Issuer certificate chain
    pub cert_chain: String,
    /// Issuer private key
    pub cert_key: String,
}

impl TrustBundle {
    /// Extract the bundle from a trust bundle secret
    ///
    /// Missing keys become empty strings.
    pub fn from_secret(secret: &Secret) -> Self {
        let read = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|value| String::from_utf8_lossy(&value.0).into_owned())
                .unwrap_or_default()
        };

        Self {
            root_cert: read(ROOT_CERT_KEY),
            cert_chain: read(ISSUER_CERT_KEY),
            cert_key: read(ISSUER_KEY_KEY),
        }
    }
}

impl fmt::Debug for TrustBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustBundle")
            .field("root_cert_len", &self.root_cert.len())
            .field("cert_chain_len", &self.cert_chain.len())
            .field("cert_key", &"<redacted>")
            .finish()
    }
}

/// Outcome of reading the trust bundle secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BundleLookup {
    /// The secret exists
    Found(TrustBundle),
    /// No such secret
    NotConfigured,
    /// The lookup itself failed
    Unavailable(String),
}

// =============================================================================
// Sources
// =============================================================================

/// Reads the cluster-wide mTLS policy flag
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MtlsPolicySource: Send + Sync {
    /// Look up the policy flag
    async fn mtls_policy(&self) -> PolicyLookup;
}

/// Reads the trust bundle secret
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TrustBundleSource: Send + Sync {
    /// Look up the trust bundle in `namespace`
    async fn trust_bundle(&self, namespace: &str) -> BundleLookup;
}

/// Policy flag read from `Configuration` objects through the API server
pub struct KubeMtlsPolicySource {
    client: Client,
    configuration_name: String,
}

impl KubeMtlsPolicySource {
    /// Create a source that looks for the Configuration named `configuration_name`
    pub fn new(client: Client, configuration_name: impl Into<String>) -> Self {
        Self {
            client,
            configuration_name: configuration_name.into(),
        }
    }
}

#[async_trait]
impl MtlsPolicySource for KubeMtlsPolicySource {
    async fn mtls_policy(&self) -> PolicyLookup {
        let api: Api<Configuration> = Api::all(self.client.clone());

        match api.list(&ListParams::default()).await {
            Ok(list) => list
                .items
                .iter()
                .find(|c| c.metadata.name.as_deref() == Some(self.configuration_name.as_str()))
                .map(|c| PolicyLookup::Configured(c.mtls_enabled()))
                .unwrap_or(PolicyLookup::NotConfigured),
            Err(e) => PolicyLookup::Unavailable(e.to_string()),
        }
    }
}

/// Trust bundle read from a Secret through the API server
pub struct KubeTrustBundleSource {
    client: Client,
    secret_name: String,
}

impl KubeTrustBundleSource {
    /// Create a source that reads the secret named `secret_name`
    pub fn new(client: Client, secret_name: impl Into<String>) -> Self {
        Self {
            client,
            secret_name: secret_name.into(),
        }
    }
}

#[async_trait]
impl TrustBundleSource for KubeTrustBundleSource {
    async fn trust_bundle(&self, namespace: &str) -> BundleLookup {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        match api.get_opt(&self.secret_name).await {
            Ok(Some(secret)) => BundleLookup::Found(TrustBundle::from_secret(&secret)),
            Ok(None) => BundleLookup::NotConfigured,
            Err(e) => BundleLookup::Unavailable(e.to_string()),
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// What to do when a trust lookup fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrustFailurePolicy {
    /// Inject without mTLS material
    #[default]
    BestEffort,
    /// Deny the admission
    FailClosed,
}

impl TrustFailurePolicy {
    /// Flag value for this policy
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustFailurePolicy::BestEffort => "best-effort",
            TrustFailurePolicy::FailClosed => "fail-closed",
        }
    }
}

impl fmt::Display for TrustFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "best-effort" => Ok(TrustFailurePolicy::BestEffort),
            "fail-closed" => Ok(TrustFailurePolicy::FailClosed),
            other => Err(Error::config_for_field(
                "trust-failure-policy",
                format!("expected 'best-effort' or 'fail-closed', got '{other}'"),
            )),
        }
    }
}

/// Trust material for one admission
///
/// Empty strings mean the value isn't available for this request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustMaterial {
    /// Root certificate, issuer chain and key
    pub bundle: TrustBundle,
    /// `<namespace>:<serviceAccountName>`
    pub identity: String,
    /// Resolved policy flag
    pub mtls_enabled: bool,
}

impl TrustMaterial {
    /// Whether the sidecar should be started with mTLS
    pub fn is_available(&self) -> bool {
        self.mtls_enabled && !self.bundle.root_cert.is_empty()
    }
}

/// Workload facts the trust lookups depend on
#[derive(Clone, Copy, Debug)]
pub struct TrustSubject<'a> {
    /// Namespace the pod is admitted into
    pub namespace: &'a str,
    /// Namespace holding the trust bundle secret
    pub bundle_namespace: &'a str,
    /// Service account the pod runs as
    pub service_account: Option<&'a str>,
}

/// Runs both trust lookups and applies the failure policy
#[derive(Clone)]
pub struct TrustResolver {
    policy: Arc<dyn MtlsPolicySource>,
    bundles: Arc<dyn TrustBundleSource>,
    failure_policy: TrustFailurePolicy,
}

impl TrustResolver {
    /// Create a resolver over the given sources
    pub fn new(
        policy: Arc<dyn MtlsPolicySource>,
        bundles: Arc<dyn TrustBundleSource>,
        failure_policy: TrustFailurePolicy,
    ) -> Self {
        Self {
            policy,
            bundles,
            failure_policy,
        }
    }

    /// Resolve the trust material for a workload
    ///
    /// The bundle is only fetched when mTLS is enabled, and the identity is
    /// only set when mTLS is enabled and the pod names a service account.
    pub async fn resolve(&self, subject: &TrustSubject<'_>) -> Result<TrustMaterial> {
        let mtls_enabled = self.resolve_policy().await?;
        if !mtls_enabled {
            return Ok(TrustMaterial::default());
        }

        let bundle = self.resolve_bundle(subject.bundle_namespace).await?;
        let identity = subject
            .service_account
            .filter(|sa| !sa.is_empty())
            .map(|sa| format!("{}:{}", subject.namespace, sa))
            .unwrap_or_default();

        Ok(TrustMaterial {
            bundle,
            identity,
            mtls_enabled,
        })
    }

    async fn resolve_policy(&self) -> Result<bool> {
        match self.policy.mtls_policy().await {
            PolicyLookup::Configured(enabled) => Ok(enabled),
            PolicyLookup::NotConfigured => {
                info!(
                    default = DEFAULT_MTLS_ENABLED,
                    "system configuration not found, using default mtls setting"
                );
                Ok(DEFAULT_MTLS_ENABLED)
            }
            PolicyLookup::Unavailable(reason) => {
                error!(error = %reason, "failed to load mtls configuration");
                match self.failure_policy {
                    TrustFailurePolicy::BestEffort => Ok(DEFAULT_MTLS_ENABLED),
                    TrustFailurePolicy::FailClosed => {
                        Err(Error::trust_unavailable("mtls policy", reason))
                    }
                }
            }
        }
    }

    async fn resolve_bundle(&self, namespace: &str) -> Result<TrustBundle> {
        match self.bundles.trust_bundle(namespace).await {
            BundleLookup::Found(bundle) => Ok(bundle),
            BundleLookup::NotConfigured => {
                debug!(namespace = %namespace, "trust bundle secret not found");
                Ok(TrustBundle::default())
            }
            BundleLookup::Unavailable(reason) => {
                debug!(namespace = %namespace, error = %reason, "failed to read trust bundle");
                match self.failure_policy {
                    TrustFailurePolicy::BestEffort => Ok(TrustBundle::default()),
                    TrustFailurePolicy::FailClosed => {
                        Err(Error::trust_unavailable("trust bundle", reason))
                    }
                }
            }
        }
    }
}
