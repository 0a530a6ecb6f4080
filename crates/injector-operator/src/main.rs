//! Sidecar injector - mutating admission webhook for daprd

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use injector_common::telemetry::init_telemetry;
use injector_core::{Injector, KubeMtlsPolicySource, KubeTrustBundleSource};
use injector_operator::config::InjectorArgs;
use injector_operator::server::start_server;
use injector_operator::webhook::WebhookState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The webhook only serves TLS, so a missing provider is fatal.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let args = InjectorArgs::parse();
    init_telemetry(args.telemetry_config())?;

    let injector_config = args.injector_config()?;
    info!(
        image = %injector_config.sidecar_image,
        control_plane_namespace = %injector_config.control_plane_namespace,
        trust_failure_policy = %injector_config.trust_failure_policy,
        "sidecar injector configured"
    );

    let client = kube::Client::try_default().await?;
    let policy = Arc::new(KubeMtlsPolicySource::new(
        client.clone(),
        args.configuration_name.clone(),
    ));
    let bundles = Arc::new(KubeTrustBundleSource::new(
        client,
        args.trust_bundle_secret.clone(),
    ));

    let injector = Injector::new(injector_config, policy, bundles);
    let state = Arc::new(WebhookState::new(injector));

    start_server(args.server_config(), state).await?;
    Ok(())
}
