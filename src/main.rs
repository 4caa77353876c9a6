use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use wiregate::backend::http::HttpBackend;
use wiregate::backend::BackendAdapter;
use wiregate::config::GatewayConfig;
use wiregate::pgwire_server::security::{Authenticator, PasswordFileAuthenticator, TrustAuthenticator};
use wiregate::pgwire_server::{start_pgwire, Gateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = GatewayConfig::from_env()?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "wiregate", "wiregate starting: RUST_LOG='{}', {}", rust_log, config.redacted_summary());

    let url = config.backend_url.clone().context("WIREGATE_BACKEND_URL is required")?;
    let external = HttpBackend::new(
        "external",
        &url,
        &config.backend_namespace,
        config.backend_user.clone(),
        config.backend_password.clone(),
    )?
    .with_max_param_bytes(Some(config.max_literal_bytes));
    let mut adapter = BackendAdapter::new(Arc::new(external));
    if let Some(embedded_url) = &config.embedded_url {
        let embedded = HttpBackend::new(
            "embedded",
            embedded_url,
            &config.backend_namespace,
            config.backend_user.clone(),
            config.backend_password.clone(),
        )?;
        adapter = adapter.with_embedded(Arc::new(embedded));
    }

    let authenticator: Arc<dyn Authenticator> = match (&config.auth_file, config.trust) {
        (Some(path), _) => {
            let auth = PasswordFileAuthenticator::load(path)?;
            info!(target: "wiregate", "loaded {} user(s) from {}", auth.user_count(), path);
            Arc::new(auth)
        }
        (None, true) => Arc::new(TrustAuthenticator),
        (None, false) => anyhow::bail!("set WIREGATE_AUTH_FILE, or WIREGATE_TRUST=1 to skip authentication"),
    };
    if config.trust && config.auth_file.is_none() {
        warn!(target: "wiregate", "trust mode: clients are not authenticated");
    }

    let gw = Arc::new(Gateway::new(config, Arc::new(adapter), authenticator));
    start_pgwire(gw).await
}
