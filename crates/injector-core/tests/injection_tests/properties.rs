//! Properties that must hold across annotation and pod combinations

use serde_json::{json, Value};

use injector_core::trust::{BundleLookup, PolicyLookup, TrustBundle};
use injector_core::{Injector, InjectorConfig};

use super::helpers::*;

const RESOURCE_ANNOTATIONS: [(&str, &str); 4] = [
    ("dapr.io/sidecar-cpu-limit", "1"),
    ("dapr.io/sidecar-memory-limit", "1Gi"),
    ("dapr.io/sidecar-cpu-request", "250m"),
    ("dapr.io/sidecar-memory-request", "128Mi"),
];

fn enabled() -> (&'static str, &'static str) {
    ("dapr.io/enabled", "true")
}

// =============================================================================
// Env merge
// =============================================================================

#[tokio::test]
async fn env_merge_never_overwrites_and_never_duplicates() {
    let injector = offline_injector();
    let existing_env = [
        json!(null),
        json!([]),
        json!([{"name": "FOO", "value": "BAR"}]),
        json!([{"name": "DAPR_HTTP_PORT", "value": "1111"}]),
        json!([{"name": "DAPR_GRPC_PORT", "value": "2222"}]),
        json!([
            {"name": "DAPR_GRPC_PORT", "value": "2222"},
            {"name": "DAPR_HTTP_PORT", "value": "1111"}
        ]),
    ];

    let containers: Vec<Value> = existing_env
        .iter()
        .enumerate()
        .map(|(i, env)| {
            let mut container = json!({"name": format!("c{i}")});
            if !env.is_null() {
                container["env"] = env.clone();
            }
            container
        })
        .collect();
    let pod = pod("multi", &[enabled()], Value::Array(containers));

    let patch = run(&injector, &pod).await.unwrap();
    let patched = apply(&pod, &patch);

    for (i, env) in existing_env.iter().enumerate() {
        let container = &patched["spec"]["containers"][i];
        assert_eq!(env_count(container, "DAPR_HTTP_PORT"), 1, "container {i}");
        assert_eq!(env_count(container, "DAPR_GRPC_PORT"), 1, "container {i}");

        for var in env.as_array().into_iter().flatten() {
            let name = var["name"].as_str().unwrap();
            assert_eq!(
                env_value(container, name),
                var["value"].as_str(),
                "container {i} lost {name}"
            );
        }
    }
}

// =============================================================================
// Defaults
// =============================================================================

#[tokio::test]
async fn port_and_probe_defaults_hold_whatever_else_is_set() {
    let injector = offline_injector();
    let unrelated = [
        ("dapr.io/log-level", "warn"),
        ("dapr.io/app-port", "8080"),
        ("dapr.io/enable-profiling", "true"),
        ("dapr.io/metrics-port", "not-a-number"),
        ("com.infoblox.dapr.sidecar-grpc-port", ""),
    ];

    for extra in unrelated {
        let pod = pod("svc", &[enabled(), extra], json!([{"name": "svc"}]));
        let patch = run(&injector, &pod).await.unwrap();
        let sidecar = &patch[0]["value"];

        let ports: Vec<i64> = sidecar["ports"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["containerPort"].as_i64().unwrap())
            .collect();
        assert_eq!(ports, vec![3500, 50001, 50002, 9090], "with {extra:?}");

        for probe in ["readinessProbe", "livenessProbe"] {
            let p = &sidecar[probe];
            assert_eq!(p["httpGet"]["path"], "/v1.0/healthz");
            assert_eq!(p["httpGet"]["port"], 3500);
            assert_eq!(p["initialDelaySeconds"], 3);
            assert_eq!(p["timeoutSeconds"], 3);
            assert_eq!(p["periodSeconds"], 6);
            assert_eq!(p["failureThreshold"], 3);
        }
    }
}

#[tokio::test]
async fn app_id_defaults_to_pod_name_unless_annotated() {
    let injector = offline_injector();
    let cases: [(&[(&str, &str)], &str); 3] = [
        (&[], "payments"),
        (&[("dapr.io/app-id", "")], "payments"),
        (&[("dapr.io/app-id", "billing")], "billing"),
    ];

    for (annotations, expected) in cases {
        let mut all = vec![enabled()];
        all.extend_from_slice(annotations);
        let pod = pod("payments", &all, json!([{"name": "app"}]));

        let patch = run(&injector, &pod).await.unwrap();
        let args = args(&patch[0]["value"]);
        let i = args.iter().position(|a| *a == "--app-id").unwrap();
        assert_eq!(args[i + 1], expected);
    }
}

// =============================================================================
// Resources
// =============================================================================

#[tokio::test]
async fn resources_present_iff_any_quantity_annotation() {
    let injector = offline_injector();

    for mask in 0u8..16 {
        let mut annotations = vec![enabled()];
        for (bit, annotation) in RESOURCE_ANNOTATIONS.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                annotations.push(*annotation);
            }
        }

        let pod = pod("svc", &annotations, json!([{"name": "svc"}]));
        let patch = run(&injector, &pod).await.unwrap();
        let resources = patch[0]["value"].get("resources");

        if mask == 0 {
            assert!(resources.is_none(), "no annotations should omit resources");
        } else {
            let resources = resources.expect("resources should be set");
            let set = resources["limits"].as_object().map_or(0, |m| m.len())
                + resources["requests"].as_object().map_or(0, |m| m.len());
            assert_eq!(set, mask.count_ones() as usize, "mask {mask:04b}");
        }
    }
}

#[tokio::test]
async fn any_bad_quantity_rejects_the_pod() {
    let injector = offline_injector();

    for (key, _) in RESOURCE_ANNOTATIONS {
        let pod = pod("svc", &[enabled(), (key, "12 cores")], json!([{"name": "svc"}]));
        let raw = serde_json::to_vec(&pod).unwrap();
        let err = injector
            .pod_patch_operations(&ctx(), &raw)
            .await
            .expect_err("bad quantity should fail");
        assert!(err.to_string().starts_with("error parsing sidecar"), "{key}");
    }
}

// =============================================================================
// mTLS gating
// =============================================================================

fn injector_for(policy: PolicyLookup, bundle: BundleLookup) -> Injector {
    injector_with(
        InjectorConfig::default(),
        StaticPolicy::new(policy),
        StaticBundle::new(bundle),
    )
}

#[tokio::test]
async fn mtls_requires_flag_and_root_certificate() {
    let empty_root = TrustBundle {
        root_cert: String::new(),
        ..trust_bundle()
    };
    let cases = [
        (PolicyLookup::Configured(true), BundleLookup::Found(trust_bundle()), true),
        (PolicyLookup::NotConfigured, BundleLookup::Found(trust_bundle()), true),
        (
            PolicyLookup::Unavailable("timeout".to_string()),
            BundleLookup::Found(trust_bundle()),
            true,
        ),
        (PolicyLookup::Configured(false), BundleLookup::Found(trust_bundle()), false),
        (PolicyLookup::Configured(true), BundleLookup::Found(empty_root), false),
        (PolicyLookup::Configured(true), BundleLookup::NotConfigured, false),
        (
            PolicyLookup::Configured(true),
            BundleLookup::Unavailable("forbidden".to_string()),
            false,
        ),
    ];

    for (policy, bundle, expect_mtls) in cases {
        let label = format!("{policy:?} / {bundle:?}");
        let injector = injector_for(policy, bundle);
        let pod = pod("svc", &[enabled()], json!([{"name": "svc"}]));

        let patch = run(&injector, &pod).await.unwrap();
        let sidecar = &patch[0]["value"];

        assert_eq!(args(sidecar).contains(&"--enable-mtls"), expect_mtls, "{label}");
        for var in [
            "DAPR_TRUST_ANCHORS",
            "DAPR_CERT_CHAIN",
            "DAPR_CERT_KEY",
            "SENTRY_LOCAL_IDENTITY",
        ] {
            assert_eq!(
                env_count(sidecar, var),
                usize::from(expect_mtls),
                "{label}: {var}"
            );
        }
    }
}
