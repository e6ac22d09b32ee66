//! OpenSASE Checkout - storefront checkout edge service

use anyhow::Result;
use opensase_checkout::api::HttpCheckoutApi;
use opensase_checkout::config::CheckoutConfig;
use opensase_checkout::notify::{spawn_log_subscriber, spawn_nats_forwarder};
use opensase_checkout::server::{router, spawn_session_sweeper, AppState};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = CheckoutConfig::from_env()?;

    let (events, _) = broadcast::channel(256);
    spawn_log_subscriber(events.subscribe());
    if let Some(url) = &config.nats_url {
        match async_nats::connect(url.as_str()).await {
            Ok(client) => {
                spawn_nats_forwarder(client, events.subscribe());
                tracing::info!(%url, "forwarding checkout events to NATS");
            }
            Err(e) => tracing::warn!(%url, error = %e, "NATS unavailable, events stay local"),
        }
    }

    let api = Arc::new(HttpCheckoutApi::new(config.api_url.clone()));
    let state = AppState::new(api, &config, events);
    spawn_session_sweeper(state.clone());
    let app = router(state);

    tracing::info!("🚀 OpenSASE Checkout listening on 0.0.0.0:{} (backend {})", config.port, config.api_url);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
