//! End-to-end injection scenarios

use serde_json::json;

use injector_core::trust::{BundleLookup, PolicyLookup};
use injector_core::InjectorConfig;

use super::helpers::*;

// =============================================================================
// Story Tests
// =============================================================================

/// Story: a plain opted-in pod gets a default sidecar and port env, nothing else
#[tokio::test]
async fn story_orders_api_gets_default_sidecar() {
    let injector = offline_injector();
    let pod = pod(
        "orders-api",
        &[("dapr.io/enabled", "true")],
        json!([{"name": "orders", "image": "orders:v1", "env": [{"name": "FOO", "value": "BAR"}]}]),
    );

    let patch = run(&injector, &pod).await.expect("pod should be patched");
    let ops = patch.as_array().unwrap();

    assert_eq!(ops.len(), 3);
    assert_eq!(ops[0]["op"], "add");
    assert_eq!(ops[0]["path"], "/spec/containers/-");
    assert_eq!(
        ops[1],
        json!({"op": "add", "path": "/spec/containers/0/env/-", "value": {"name": "DAPR_HTTP_PORT", "value": "3500"}})
    );
    assert_eq!(
        ops[2],
        json!({"op": "add", "path": "/spec/containers/0/env/-", "value": {"name": "DAPR_GRPC_PORT", "value": "50001"}})
    );

    let sidecar = &ops[0]["value"];
    assert_eq!(sidecar["name"], "daprd");
    assert_eq!(
        sidecar["ports"],
        json!([
            {"containerPort": 3500, "name": "dapr-http"},
            {"containerPort": 50001, "name": "dapr-grpc"},
            {"containerPort": 50002, "name": "dapr-internal"},
            {"containerPort": 9090, "name": "dapr-metrics"}
        ])
    );
    assert!(sidecar.get("resources").is_none());

    let args = args(sidecar);
    assert!(!args.contains(&"--enable-mtls"));
    let app_id = args.iter().position(|a| *a == "--app-id").unwrap();
    assert_eq!(args[app_id + 1], "orders-api");
    assert!(env_value(sidecar, "DAPR_TRUST_ANCHORS").is_none());

    let patched = apply(&pod, &patch);
    let app = &patched["spec"]["containers"][0];
    assert_eq!(env_value(app, "FOO"), Some("BAR"));
    assert_eq!(env_value(app, "DAPR_HTTP_PORT"), Some("3500"));
    assert_eq!(env_value(app, "DAPR_GRPC_PORT"), Some("50001"));
}

/// Story: running the injector on its own output changes nothing
#[tokio::test]
async fn story_reinjection_is_a_no_op() {
    let injector = mtls_injector();
    let pod = pod(
        "orders-api",
        &[("dapr.io/enabled", "true"), ("dapr.io/app-port", "8080")],
        json!([{"name": "orders"}, {"name": "metrics-exporter", "env": []}]),
    );

    let patch = run(&injector, &pod).await.expect("first pass patches");
    let patched = apply(&pod, &patch);
    assert_eq!(patched["spec"]["containers"].as_array().unwrap().len(), 3);

    assert!(run(&injector, &patched).await.is_none());
}

/// Story: a pod with no containers gets a fresh container list
#[tokio::test]
async fn story_empty_pod_gets_container_list() {
    let injector = offline_injector();
    let pod = pod("batch", &[("dapr.io/enabled", "on")], json!([]));

    let patch = run(&injector, &pod).await.unwrap();
    let ops = patch.as_array().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0]["path"], "/spec/containers");
    assert_eq!(ops[0]["value"].as_array().unwrap().len(), 1);
    assert_eq!(ops[0]["value"][0]["name"], "daprd");

    let patched = apply(&pod, &patch);
    assert_eq!(sidecar(&patched)["command"], json!(["/daprd"]));
}

/// Story: a fully configured pod in an mTLS cluster
#[tokio::test]
async fn story_fully_configured_pod_with_mtls() {
    let injector = mtls_injector();
    let mut pod = pod(
        "checkout-5d8f7",
        &[
            ("dapr.io/enabled", "true"),
            ("dapr.io/app-id", "checkout"),
            ("dapr.io/app-port", "6000"),
            ("dapr.io/app-protocol", "grpc"),
            ("dapr.io/config", "tracing"),
            ("dapr.io/log-level", "debug"),
            ("dapr.io/log-as-json", "true"),
            ("dapr.io/app-ssl", "true"),
            ("dapr.io/api-token-secret", "dapr-api-token"),
            ("dapr.io/sidecar-cpu-limit", "300m"),
            ("dapr.io/sidecar-memory-request", "250Mi"),
            ("com.infoblox.dapr.sidecar-http-port", "3501"),
        ],
        json!([{
            "name": "checkout",
            "volumeMounts": [{
                "name": "kube-api-access-9xk2q",
                "mountPath": "/var/run/secrets/kubernetes.io/serviceaccount",
                "readOnly": true
            }]
        }]),
    );
    pod["spec"]["serviceAccountName"] = json!("checkout");

    let patch = run(&injector, &pod).await.unwrap();
    let patched = apply(&pod, &patch);
    let sidecar = sidecar(&patched);

    assert_eq!(sidecar["image"], "daprio/daprd:1.12.0");
    assert_eq!(sidecar["imagePullPolicy"], "IfNotPresent");
    assert_eq!(
        sidecar["resources"],
        json!({"limits": {"cpu": "300m"}, "requests": {"memory": "250Mi"}})
    );
    assert_eq!(
        sidecar["volumeMounts"],
        json!([{
            "name": "kube-api-access-9xk2q",
            "mountPath": "/var/run/secrets/kubernetes.io/serviceaccount",
            "readOnly": true
        }])
    );
    assert_eq!(sidecar["readinessProbe"]["httpGet"]["port"], 3501);

    let args = args(sidecar);
    let tail: Vec<_> = args.iter().skip(30).copied().collect();
    assert_eq!(tail, vec!["--log-as-json", "--enable-mtls", "--app-ssl"]);
    let flag = |name: &str| {
        let i = args.iter().position(|a| *a == name).unwrap();
        args[i + 1]
    };
    assert_eq!(flag("--app-id"), "checkout");
    assert_eq!(flag("--app-port"), "6000");
    assert_eq!(flag("--app-protocol"), "grpc");
    assert_eq!(flag("--config"), "tracing");
    assert_eq!(flag("--log-level"), "debug");
    assert_eq!(flag("--dapr-http-port"), "3501");

    assert_eq!(
        env_value(sidecar, "DAPR_TRUST_ANCHORS"),
        Some(trust_bundle().root_cert.as_str())
    );
    assert_eq!(env_value(sidecar, "SENTRY_LOCAL_IDENTITY"), Some("default:checkout"));
    assert_eq!(env_count(sidecar, "DAPR_API_TOKEN"), 1);
    assert_eq!(env_count(sidecar, "APP_API_TOKEN"), 0);

    let app = &patched["spec"]["containers"][0];
    assert_eq!(env_value(app, "DAPR_HTTP_PORT"), Some("3501"));
}

/// Story: a typo in a strict annotation disables that setting but still injects
#[tokio::test]
async fn story_strict_annotation_typo_still_injects() {
    let injector = offline_injector();
    let pod = pod(
        "orders-api",
        &[
            ("dapr.io/enabled", "true"),
            ("dapr.io/app-port", "http"),
            ("dapr.io/app-max-concurrency", "ten"),
        ],
        json!([{"name": "orders"}]),
    );

    let patch = run(&injector, &pod).await.unwrap();
    let args = args(&patch[0]["value"]);
    let flag = |name: &str| {
        let i = args.iter().position(|a| *a == name).unwrap();
        args[i + 1]
    };
    assert_eq!(flag("--app-port"), "");
    assert_eq!(flag("--app-max-concurrency"), "-1");
}

/// Story: a skipped pod never reaches the trust lookups
#[tokio::test]
async fn story_skipped_pods_do_no_lookups() {
    let policy = StaticPolicy::new(PolicyLookup::Configured(true));
    let bundle = StaticBundle::new(BundleLookup::Found(trust_bundle()));
    let injector = injector_with(InjectorConfig::default(), policy.clone(), bundle.clone());

    let not_enabled = pod("web", &[], json!([{"name": "web"}]));
    assert!(run(&injector, &not_enabled).await.is_none());

    let injected = pod(
        "web",
        &[("dapr.io/enabled", "true")],
        json!([{"name": "web"}, {"name": "daprd"}]),
    );
    assert!(run(&injector, &injected).await.is_none());

    assert_eq!(policy.calls(), 0);
    assert_eq!(bundle.calls(), 0);
}

/// Story: disabled mTLS means the secret is never read
#[tokio::test]
async fn story_disabled_mtls_skips_secret_read() {
    let policy = StaticPolicy::new(PolicyLookup::Configured(false));
    let bundle = StaticBundle::new(BundleLookup::Found(trust_bundle()));
    let injector = injector_with(InjectorConfig::default(), policy.clone(), bundle.clone());

    let pod = pod("web", &[("dapr.io/enabled", "true")], json!([{"name": "web"}]));
    let patch = run(&injector, &pod).await.unwrap();

    assert!(!args(&patch[0]["value"]).contains(&"--enable-mtls"));
    assert_eq!(policy.calls(), 1);
    assert_eq!(bundle.calls(), 0);
}

/// Story: API-server-shaped pods that never opted in pass through untouched
#[tokio::test]
async fn story_defaulted_pod_without_opt_in_is_skipped() {
    let injector = offline_injector();
    let pod = pod("web-7d9f8", &[], api_server_containers());

    assert!(run(&injector, &pod).await.is_none());
}

/// Story: an opted-in pod with named-port, exec and startup probes is injected
#[tokio::test]
async fn story_defaulted_pod_with_opt_in_is_injected() {
    let injector = mtls_injector();
    let pod = pod(
        "web-7d9f8",
        &[("dapr.io/enabled", "true"), ("dapr.io/app-id", "web")],
        api_server_containers(),
    );

    let patch = run(&injector, &pod).await.expect("pod should be patched");
    let patched = apply(&pod, &patch);
    let containers = patched["spec"]["containers"].as_array().unwrap();
    assert_eq!(containers.len(), 3);

    let web = &containers[0];
    assert_eq!(web["livenessProbe"]["httpGet"]["port"], "http");
    assert_eq!(env_count(web, "POD_IP"), 1);
    assert_eq!(env_value(web, "DAPR_HTTP_PORT"), Some("3500"));
    assert_eq!(env_value(&containers[1], "DAPR_GRPC_PORT"), Some("50001"));

    let sidecar = sidecar(&patched);
    let mount = &sidecar["volumeMounts"][0];
    assert_eq!(mount["name"], "kube-api-access-x7k2p");
    assert_eq!(mount["readOnly"], true);
    assert!(args(sidecar).contains(&"--enable-mtls"));
}
