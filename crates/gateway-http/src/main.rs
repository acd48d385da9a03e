//! # Gateway HTTP server
//!
//! Serves the gateway's REST, metrics and file routes over HTTP and HTTPS.
//!
//! ## Usage
//!
//! ```bash
//! GATEWAY_HTTP_PORT=8080 GATEWAY_HTTPS_PORT=8443 \
//!   GATEWAY_TLS_CERT=creds/server.crt.pem GATEWAY_TLS_KEY=creds/server.key.pem \
//!   cargo run -p gateway-http --release
//! ```

use std::sync::Arc;

use anyhow::Context;
use gateway_http::handlers::default_routes;
use gateway_http::logging::init_logging;
use gateway_http::{Config, CredentialStore, HTTPS_SERVER_SEC_TAG, ListenerSet, Reactor, ServerMetrics};
use tracing::info;

fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    init_logging(&config.log_level).context("installing log subscriber")?;

    let mut creds = CredentialStore::new();
    creds
        .load_server_certificate(HTTPS_SERVER_SEC_TAG, &config.tls_cert, &config.tls_key)
        .context("installing HTTPS credentials")?;

    let listeners = ListenerSet::bind(&config, &creds).context("binding listeners")?;

    let metrics = Arc::new(ServerMetrics::new());
    let router = default_routes(&config, metrics.clone());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        files = %config.files_root.display(),
        "gateway starting"
    );

    Reactor::new(listeners, config.max_connections, router, metrics).run()
}
