use anyhow::Context;
use portcullis_server::{
    app::{AppState, router},
    auth::{OidcClient, SessionStore},
    catalog::{CatalogHandle, CatalogLoader},
    config::GatewayConfig,
    proxy::{HttpProxy, websocket},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = GatewayConfig::from_env().context("failed to load configuration")?;
    tracing::info!(host = %config.host, "Loaded configuration");

    let http_client = config
        .upstream
        .http_client()
        .context("failed to create HTTP client")?;
    let proxy_client = config
        .upstream
        .proxy_client()
        .context("failed to create proxy HTTP client")?;
    let websocket_tls = websocket::tls_connector(config.upstream.insecure_skip_verify)
        .context("failed to create websocket TLS connector")?;
    if config.upstream.insecure_skip_verify {
        tracing::warn!("TLS certificate verification is disabled for backends and the identity provider");
    }
    if config.upstream.websocket_compression {
        tracing::warn!("websocket compression is not supported, frames are relayed uncompressed");
    }

    let sessions = SessionStore::new(&config.cookie)?;

    // Initialize OIDC client
    tracing::info!("Discovering OIDC provider...");
    let oidc_client = Arc::new(
        OidcClient::discover(config.oidc.clone(), http_client.clone())
            .await
            .context("failed to discover OIDC provider")?,
    );

    // The first catalog load must succeed before serving
    let loader = CatalogLoader::new(&config.catalog, http_client);
    let catalog = CatalogHandle::new(loader.load().await.context("failed to load catalog")?);
    tracing::info!("Loaded catalog");

    // Spawn periodic refresh task
    let refresh_catalog = catalog.clone();
    let refresh_oidc = oidc_client.clone();
    let refresh_interval = Duration::from_secs(config.catalog.refresh_seconds);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh_interval);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = loader.refresh(&refresh_catalog).await {
                tracing::warn!(error = %e, "Catalog refresh failed, keeping previous snapshot");
            }
            if let Err(e) = refresh_oidc.refresh_metadata().await {
                tracing::warn!(error = %e, "OIDC re-discovery failed, keeping previous metadata");
            }
        }
    });

    let upstream = Arc::new(HttpProxy::new(
        proxy_client,
        websocket_tls,
        catalog.clone(),
        config.challenge.unlisted_message.clone(),
    ));
    let listen = config.listen.clone();

    // Create application state
    let app_state = Arc::new(AppState {
        config,
        sessions,
        identity_provider: oidc_client,
        catalog,
        upstream,
    });
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind to {listen}"))?;

    tracing::info!("listening on http://{}", listen);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
