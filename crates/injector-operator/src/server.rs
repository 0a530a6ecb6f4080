//! HTTPS server for the admission webhook

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use injector_common::{Error, Result};

use crate::webhook::{webhook_router, WebhookState};

/// Listener configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind
    pub addr: SocketAddr,
    /// PEM certificate file
    pub cert_file: PathBuf,
    /// PEM private key file
    pub key_file: PathBuf,
}

/// Serve the webhook until the process exits
pub async fn start_server(config: ServerConfig, state: Arc<WebhookState>) -> Result<()> {
    let tls_config = RustlsConfig::from_pem_file(&config.cert_file, &config.key_file)
        .await
        .map_err(|e| {
            Error::config_for_field(
                "tls-cert-file",
                format!(
                    "failed to load TLS material from {} and {}: {}",
                    config.cert_file.display(),
                    config.key_file.display(),
                    e
                ),
            )
        })?;

    let app = webhook_router(state);

    info!(addr = %config.addr, "starting sidecar injector webhook");

    axum_server::bind_rustls(config.addr, tls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::internal_with_context("server", e.to_string()))
}
