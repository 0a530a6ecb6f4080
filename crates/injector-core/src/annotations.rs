//! Pod annotation resolution
//!
//! Every sidecar option is declared once below as a typed setting that pairs
//! an annotation key with its default and parse strategy:
//!
//! - [`StringSetting`]: missing or empty value falls back to the default
//! - [`BoolSetting`]: `y`, `yes`, `true`, `on`, `1` (any case) are true,
//!   any other present value is false, absence gives the default
//! - [`IntSetting`]: missing or unparsable value falls back to the default
//! - [`StrictIntSetting`]: missing value is [`DISABLED`]; an unparsable value
//!   is also [`DISABLED`] but is reported back as an [`AnnotationWarning`]
//!
//! [`SidecarConfig::resolve`] runs all of them in one pass.

use std::collections::BTreeMap;
use std::fmt;

use injector_common::{Error, Result};

use crate::k8s::ResourceRequirements;
use crate::quantity::parse_quantity;

/// Sentinel for strict integer settings that are absent or unparsable
pub const DISABLED: i32 = -1;

/// Annotation keys recognised on admitted pods
pub mod keys {
    /// Opt-in flag
    pub const ENABLED: &str = "dapr.io/enabled";
    /// Application id (defaults to the pod name)
    pub const APP_ID: &str = "dapr.io/app-id";
    /// Port the application listens on
    pub const APP_PORT: &str = "dapr.io/app-port";
    /// Name of the Configuration the sidecar loads
    pub const CONFIG: &str = "dapr.io/config";
    /// Protocol the application speaks
    pub const APP_PROTOCOL: &str = "dapr.io/app-protocol";
    /// Enable the profiling server
    pub const ENABLE_PROFILING: &str = "dapr.io/enable-profiling";
    /// Sidecar log level
    pub const LOG_LEVEL: &str = "dapr.io/log-level";
    /// Sidecar logs as JSON
    pub const LOG_AS_JSON: &str = "dapr.io/log-as-json";
    /// Secret holding the API token
    pub const API_TOKEN_SECRET: &str = "dapr.io/api-token-secret";
    /// Secret holding the app token
    pub const APP_TOKEN_SECRET: &str = "dapr.io/app-token-secret";
    /// Max concurrent requests to the application
    pub const APP_MAX_CONCURRENCY: &str = "dapr.io/app-max-concurrency";
    /// Metrics port
    pub const METRICS_PORT: &str = "dapr.io/metrics-port";
    /// Max HTTP request body size in MB
    pub const HTTP_MAX_REQUEST_SIZE: &str = "dapr.io/http-max-request-size";
    /// Application uses TLS
    pub const APP_SSL: &str = "dapr.io/app-ssl";

    /// Sidecar HTTP API port
    pub const SIDECAR_HTTP_PORT: &str = "com.infoblox.dapr.sidecar-http-port";
    /// Sidecar gRPC API port
    pub const SIDECAR_GRPC_PORT: &str = "com.infoblox.dapr.sidecar-grpc-port";
    /// Sidecar internal gRPC port
    pub const SIDECAR_INTERNAL_GRPC_PORT: &str = "com.infoblox.dapr.sidecar-internal-grpc-port";

    /// Sidecar CPU limit
    pub const CPU_LIMIT: &str = "dapr.io/sidecar-cpu-limit";
    /// Sidecar memory limit
    pub const MEMORY_LIMIT: &str = "dapr.io/sidecar-memory-limit";
    /// Sidecar CPU request
    pub const CPU_REQUEST: &str = "dapr.io/sidecar-cpu-request";
    /// Sidecar memory request
    pub const MEMORY_REQUEST: &str = "dapr.io/sidecar-memory-request";

    /// Liveness probe initial delay
    pub const LIVENESS_PROBE_DELAY: &str = "dapr.io/sidecar-liveness-probe-delay-seconds";
    /// Liveness probe timeout
    pub const LIVENESS_PROBE_TIMEOUT: &str = "dapr.io/sidecar-liveness-probe-timeout-seconds";
    /// Liveness probe period
    pub const LIVENESS_PROBE_PERIOD: &str = "dapr.io/sidecar-liveness-probe-period-seconds";
    /// Liveness probe failure threshold
    pub const LIVENESS_PROBE_THRESHOLD: &str = "dapr.io/sidecar-liveness-probe-threshold";
    /// Readiness probe initial delay
    pub const READINESS_PROBE_DELAY: &str = "dapr.io/sidecar-readiness-probe-delay-seconds";
    /// Readiness probe timeout
    pub const READINESS_PROBE_TIMEOUT: &str = "dapr.io/sidecar-readiness-probe-timeout-seconds";
    /// Readiness probe period
    pub const READINESS_PROBE_PERIOD: &str = "dapr.io/sidecar-readiness-probe-period-seconds";
    /// Readiness probe failure threshold
    pub const READINESS_PROBE_THRESHOLD: &str = "dapr.io/sidecar-readiness-probe-threshold";
}

/// Default sidecar HTTP port
pub const DEFAULT_SIDECAR_HTTP_PORT: i32 = 3500;
/// Default sidecar gRPC port
pub const DEFAULT_SIDECAR_GRPC_PORT: i32 = 50001;
/// Default sidecar internal gRPC port
pub const DEFAULT_SIDECAR_INTERNAL_GRPC_PORT: i32 = 50002;
/// Default metrics port
pub const DEFAULT_METRICS_PORT: i32 = 9090;
/// Default probe initial delay in seconds
pub const DEFAULT_PROBE_DELAY_SECONDS: i32 = 3;
/// Default probe timeout in seconds
pub const DEFAULT_PROBE_TIMEOUT_SECONDS: i32 = 3;
/// Default probe period in seconds
pub const DEFAULT_PROBE_PERIOD_SECONDS: i32 = 6;
/// Default probe failure threshold
pub const DEFAULT_PROBE_THRESHOLD: i32 = 3;

// =============================================================================
// Settings
// =============================================================================

/// Read-only view over a pod's annotations
#[derive(Clone, Copy, Debug)]
pub struct Annotations<'a> {
    inner: &'a BTreeMap<String, String>,
}

impl<'a> Annotations<'a> {
    /// Wrap an annotation map
    pub fn new(inner: &'a BTreeMap<String, String>) -> Self {
        Self { inner }
    }

    /// Raw value for `key`, if present (possibly empty)
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.inner.get(key).map(String::as_str)
    }

    /// Value for `key` if present and non-empty
    pub fn non_empty(&self, key: &str) -> Option<&'a str> {
        self.get(key).filter(|v| !v.is_empty())
    }
}

/// Parse a boolean annotation value
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "y" | "yes" | "true" | "on" | "1"
    )
}

/// String annotation with a default
#[derive(Clone, Copy, Debug)]
pub struct StringSetting {
    /// Annotation key
    pub key: &'static str,
    /// Value used when missing or empty
    pub default: &'static str,
}

impl StringSetting {
    /// Declare a string setting
    pub const fn new(key: &'static str, default: &'static str) -> Self {
        Self { key, default }
    }

    /// Resolve against a pod's annotations
    pub fn resolve(&self, annotations: &Annotations<'_>) -> String {
        annotations
            .non_empty(self.key)
            .unwrap_or(self.default)
            .to_string()
    }

    /// Resolve to `None` when missing or empty
    pub fn resolve_opt(&self, annotations: &Annotations<'_>) -> Option<String> {
        annotations.non_empty(self.key).map(str::to_string)
    }
}

/// Boolean annotation with a default
#[derive(Clone, Copy, Debug)]
pub struct BoolSetting {
    /// Annotation key
    pub key: &'static str,
    /// Value used when missing
    pub default: bool,
}

impl BoolSetting {
    /// Declare a boolean setting
    pub const fn new(key: &'static str, default: bool) -> Self {
        Self { key, default }
    }

    /// Resolve against a pod's annotations
    pub fn resolve(&self, annotations: &Annotations<'_>) -> bool {
        annotations
            .get(self.key)
            .map(parse_bool)
            .unwrap_or(self.default)
    }
}

/// Integer annotation that silently falls back to its default
#[derive(Clone, Copy, Debug)]
pub struct IntSetting {
    /// Annotation key
    pub key: &'static str,
    /// Value used when missing or unparsable
    pub default: i32,
}

impl IntSetting {
    /// Declare a lenient integer setting
    pub const fn new(key: &'static str, default: i32) -> Self {
        Self { key, default }
    }

    /// Resolve against a pod's annotations
    pub fn resolve(&self, annotations: &Annotations<'_>) -> i32 {
        annotations
            .get(self.key)
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(self.default)
    }
}

/// Integer annotation where absence means "feature disabled"
#[derive(Clone, Copy, Debug)]
pub struct StrictIntSetting {
    /// Annotation key
    pub key: &'static str,
}

impl StrictIntSetting {
    /// Declare a strict integer setting
    pub const fn new(key: &'static str) -> Self {
        Self { key }
    }

    /// Resolve against a pod's annotations
    ///
    /// Returns [`DISABLED`] when the annotation is missing, and a warning when
    /// it is present but not a 32-bit integer.
    pub fn resolve(
        &self,
        annotations: &Annotations<'_>,
    ) -> std::result::Result<i32, AnnotationWarning> {
        match annotations.get(self.key) {
            None => Ok(DISABLED),
            Some(value) => value.parse::<i32>().map_err(|e| AnnotationWarning {
                key: self.key,
                value: value.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// A recoverable annotation problem; the setting fell back to [`DISABLED`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationWarning {
    /// Annotation key
    pub key: &'static str,
    /// Offending value
    pub value: String,
    /// Parser message
    pub reason: String,
}

impl fmt::Display for AnnotationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error parsing {} int value {}: {}",
            self.key, self.value, self.reason
        )
    }
}

/// Opt-in flag
pub const ENABLED: BoolSetting = BoolSetting::new(keys::ENABLED, false);
/// Application port
pub const APP_PORT: StrictIntSetting = StrictIntSetting::new(keys::APP_PORT);
/// Configuration name
pub const CONFIG: StringSetting = StringSetting::new(keys::CONFIG, "");
/// Application protocol
pub const APP_PROTOCOL: StringSetting = StringSetting::new(keys::APP_PROTOCOL, "http");
/// Sidecar log level
pub const LOG_LEVEL: StringSetting = StringSetting::new(keys::LOG_LEVEL, "info");
/// JSON logging
pub const LOG_AS_JSON: BoolSetting = BoolSetting::new(keys::LOG_AS_JSON, false);
/// Profiling
pub const ENABLE_PROFILING: BoolSetting = BoolSetting::new(keys::ENABLE_PROFILING, false);
/// Application TLS
pub const APP_SSL: BoolSetting = BoolSetting::new(keys::APP_SSL, false);
/// Max concurrency
pub const APP_MAX_CONCURRENCY: StrictIntSetting = StrictIntSetting::new(keys::APP_MAX_CONCURRENCY);
/// Max request body size
pub const HTTP_MAX_REQUEST_SIZE: StrictIntSetting =
    StrictIntSetting::new(keys::HTTP_MAX_REQUEST_SIZE);
/// Metrics port
pub const METRICS_PORT: IntSetting = IntSetting::new(keys::METRICS_PORT, DEFAULT_METRICS_PORT);
/// Sidecar HTTP port
pub const SIDECAR_HTTP_PORT: IntSetting =
    IntSetting::new(keys::SIDECAR_HTTP_PORT, DEFAULT_SIDECAR_HTTP_PORT);
/// Sidecar gRPC port
pub const SIDECAR_GRPC_PORT: IntSetting =
    IntSetting::new(keys::SIDECAR_GRPC_PORT, DEFAULT_SIDECAR_GRPC_PORT);
/// Sidecar internal gRPC port
pub const SIDECAR_INTERNAL_GRPC_PORT: IntSetting = IntSetting::new(
    keys::SIDECAR_INTERNAL_GRPC_PORT,
    DEFAULT_SIDECAR_INTERNAL_GRPC_PORT,
);
/// API token secret
pub const API_TOKEN_SECRET: StringSetting = StringSetting::new(keys::API_TOKEN_SECRET, "");
/// App token secret
pub const APP_TOKEN_SECRET: StringSetting = StringSetting::new(keys::APP_TOKEN_SECRET, "");

/// Timing settings for one probe
#[derive(Clone, Copy, Debug)]
pub struct ProbeSettings {
    /// Initial delay
    pub delay: IntSetting,
    /// Timeout
    pub timeout: IntSetting,
    /// Period
    pub period: IntSetting,
    /// Failure threshold
    pub threshold: IntSetting,
}

impl ProbeSettings {
    const fn new(
        delay: &'static str,
        timeout: &'static str,
        period: &'static str,
        threshold: &'static str,
    ) -> Self {
        Self {
            delay: IntSetting::new(delay, DEFAULT_PROBE_DELAY_SECONDS),
            timeout: IntSetting::new(timeout, DEFAULT_PROBE_TIMEOUT_SECONDS),
            period: IntSetting::new(period, DEFAULT_PROBE_PERIOD_SECONDS),
            threshold: IntSetting::new(threshold, DEFAULT_PROBE_THRESHOLD),
        }
    }

    /// Resolve against a pod's annotations
    pub fn resolve(&self, annotations: &Annotations<'_>) -> ProbeTimings {
        ProbeTimings {
            initial_delay_seconds: self.delay.resolve(annotations),
            timeout_seconds: self.timeout.resolve(annotations),
            period_seconds: self.period.resolve(annotations),
            failure_threshold: self.threshold.resolve(annotations),
        }
    }
}

/// Liveness probe timings
pub const LIVENESS_PROBE: ProbeSettings = ProbeSettings::new(
    keys::LIVENESS_PROBE_DELAY,
    keys::LIVENESS_PROBE_TIMEOUT,
    keys::LIVENESS_PROBE_PERIOD,
    keys::LIVENESS_PROBE_THRESHOLD,
);
/// Readiness probe timings
pub const READINESS_PROBE: ProbeSettings = ProbeSettings::new(
    keys::READINESS_PROBE_DELAY,
    keys::READINESS_PROBE_TIMEOUT,
    keys::READINESS_PROBE_PERIOD,
    keys::READINESS_PROBE_THRESHOLD,
);

/// Resource quantity annotations, in resolution order
const RESOURCE_SETTINGS: [ResourceSetting; 4] = [
    ResourceSetting::limit(keys::CPU_LIMIT, "cpu", "cpu limit"),
    ResourceSetting::limit(keys::MEMORY_LIMIT, "memory", "memory limit"),
    ResourceSetting::request(keys::CPU_REQUEST, "cpu", "cpu request"),
    ResourceSetting::request(keys::MEMORY_REQUEST, "memory", "memory request"),
];

struct ResourceSetting {
    key: &'static str,
    resource: &'static str,
    label: &'static str,
    limit: bool,
}

impl ResourceSetting {
    const fn limit(key: &'static str, resource: &'static str, label: &'static str) -> Self {
        Self {
            key,
            resource,
            label,
            limit: true,
        }
    }

    const fn request(key: &'static str, resource: &'static str, label: &'static str) -> Self {
        Self {
            key,
            resource,
            label,
            limit: false,
        }
    }
}

/// Resolve sidecar resource requirements
///
/// Returns `Ok(None)` when none of the four quantity annotations are present.
/// Any present value that fails to parse aborts resolution.
pub fn resolve_resources(annotations: &Annotations<'_>) -> Result<Option<ResourceRequirements>> {
    let mut resources = ResourceRequirements::default();

    for setting in &RESOURCE_SETTINGS {
        let Some(value) = annotations.get(setting.key) else {
            continue;
        };
        let quantity =
            parse_quantity(value).map_err(|e| Error::resource(setting.label, e.to_string()))?;
        let target = if setting.limit {
            &mut resources.limits
        } else {
            &mut resources.requests
        };
        target.insert(setting.resource.to_string(), quantity);
    }

    if resources.is_empty() {
        Ok(None)
    } else {
        Ok(Some(resources))
    }
}

// =============================================================================
// Resolved configuration
// =============================================================================

/// Sidecar ports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SidecarPorts {
    /// HTTP API port
    pub http: i32,
    /// gRPC API port
    pub grpc: i32,
    /// Internal gRPC port (sidecar to sidecar)
    pub internal_grpc: i32,
    /// Metrics port
    pub metrics: i32,
}

impl Default for SidecarPorts {
    fn default() -> Self {
        Self {
            http: DEFAULT_SIDECAR_HTTP_PORT,
            grpc: DEFAULT_SIDECAR_GRPC_PORT,
            internal_grpc: DEFAULT_SIDECAR_INTERNAL_GRPC_PORT,
            metrics: DEFAULT_METRICS_PORT,
        }
    }
}

/// Timings for one probe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeTimings {
    /// Initial delay
    pub initial_delay_seconds: i32,
    /// Timeout
    pub timeout_seconds: i32,
    /// Period
    pub period_seconds: i32,
    /// Failure threshold
    pub failure_threshold: i32,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            initial_delay_seconds: DEFAULT_PROBE_DELAY_SECONDS,
            timeout_seconds: DEFAULT_PROBE_TIMEOUT_SECONDS,
            period_seconds: DEFAULT_PROBE_PERIOD_SECONDS,
            failure_threshold: DEFAULT_PROBE_THRESHOLD,
        }
    }
}

/// Typed sidecar configuration resolved from a pod's annotations
#[derive(Clone, Debug, PartialEq)]
pub struct SidecarConfig {
    /// Sidecar ports
    pub ports: SidecarPorts,
    /// Application port, or [`DISABLED`]
    pub app_port: i32,
    /// Configuration name
    pub config: String,
    /// Application protocol
    pub app_protocol: String,
    /// Log level
    pub log_level: String,
    /// JSON logging
    pub log_as_json: bool,
    /// Profiling
    pub enable_profiling: bool,
    /// Application TLS
    pub app_ssl: bool,
    /// Max concurrency, or [`DISABLED`]
    pub max_concurrency: i32,
    /// Max request body size, or [`DISABLED`]
    pub max_request_body_size: i32,
    /// Readiness probe timings
    pub readiness: ProbeTimings,
    /// Liveness probe timings
    pub liveness: ProbeTimings,
    /// Resource requirements, if any quantity annotation was set
    pub resources: Option<ResourceRequirements>,
    /// Secret holding the API token
    pub api_token_secret: Option<String>,
    /// Secret holding the app token
    pub app_token_secret: Option<String>,
}

/// Result of resolving a pod's annotations
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    /// The resolved configuration
    pub config: SidecarConfig,
    /// Strict settings that fell back to [`DISABLED`] because they didn't parse
    pub warnings: Vec<AnnotationWarning>,
}

impl SidecarConfig {
    /// Resolve all sidecar settings in one pass
    ///
    /// Only a malformed resource quantity is an error.
    pub fn resolve(annotations: &Annotations<'_>) -> Result<ResolvedConfig> {
        let mut warnings = Vec::new();
        let mut strict = |setting: StrictIntSetting| {
            setting.resolve(annotations).unwrap_or_else(|warning| {
                warnings.push(warning);
                DISABLED
            })
        };

        let app_port = strict(APP_PORT);
        let max_concurrency = strict(APP_MAX_CONCURRENCY);
        let max_request_body_size = strict(HTTP_MAX_REQUEST_SIZE);

        let config = SidecarConfig {
            ports: SidecarPorts {
                http: SIDECAR_HTTP_PORT.resolve(annotations),
                grpc: SIDECAR_GRPC_PORT.resolve(annotations),
                internal_grpc: SIDECAR_INTERNAL_GRPC_PORT.resolve(annotations),
                metrics: METRICS_PORT.resolve(annotations),
            },
            app_port,
            config: CONFIG.resolve(annotations),
            app_protocol: APP_PROTOCOL.resolve(annotations),
            log_level: LOG_LEVEL.resolve(annotations),
            log_as_json: LOG_AS_JSON.resolve(annotations),
            enable_profiling: ENABLE_PROFILING.resolve(annotations),
            app_ssl: APP_SSL.resolve(annotations),
            max_concurrency,
            max_request_body_size,
            readiness: READINESS_PROBE.resolve(annotations),
            liveness: LIVENESS_PROBE.resolve(annotations),
            resources: resolve_resources(annotations)?,
            api_token_secret: API_TOKEN_SECRET.resolve_opt(annotations),
            app_token_secret: APP_TOKEN_SECRET.resolve_opt(annotations),
        };

        Ok(ResolvedConfig { config, warnings })
    }
}
