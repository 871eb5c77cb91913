use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use sync_core::cachet::{CachetClient, IncidentApi};
use sync_core::identity::IdentityCache;
use sync_core::retry::Retrying;
use sync_core::synchronizer::Synchronizer;
use sync_server::config::Config;
use sync_server::webhook::{self, AppState};
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config.log_level);

    let http = config.http_client().context("building CachetHQ client")?;
    let client = CachetClient::new(http, &config.cachethq_url, &config.cachethq_token);
    let api: Arc<dyn IncidentApi> = Arc::new(Retrying::new(client, config.cachethq_retries));

    let synchronizer = Synchronizer::new(api, Arc::new(IdentityCache::new()), config.sync_settings());
    let state = AppState::new(synchronizer, config.prometheus_token());
    let app = webhook::app(state, config.request_timeout());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    match config.server_tls()? {
        Some((cert, key)) => {
            let _ = rustls::crypto::ring::default_provider().install_default();
            let tls = RustlsConfig::from_pem_file(&cert, &key)
                .await
                .with_context(|| format!("loading TLS certificate {cert:?} and key {key:?}"))?;

            tracing::info!(%addr, cachethq = %config.cachethq_url, "listening (https)");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await
                .context("https server")?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;

            tracing::info!(%addr, cachethq = %config.cachethq_url, "listening (http)");
            axum::serve(listener, app).await.context("http server")?;
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str) {
    let default_directive: Directive = log_level.parse().unwrap_or_else(|_| LevelFilter::INFO.into());
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
