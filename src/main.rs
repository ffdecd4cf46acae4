mod config;

use clap::Parser as _;
use config::Config;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, instrument};
use z2api::auth::ApiKey;
use z2api::cookies::CookiePool;
use z2api::{AppState, ProxySettings, build_router};

#[tokio::main]
#[instrument]
pub async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse().validate()?;
    info!(
        port = config.port,
        model = %config.model_name,
        upstream_model = %config.upstream_model,
        upstream_url = %config.upstream_url,
        show_think_tags = config.show_think_tags,
        cookies = config.cookies.len(),
        "Starting Z.AI proxy"
    );

    let settings = ProxySettings {
        api_key: ApiKey::new(config.api_key.clone()),
        model_name: config.model_name.clone(),
        upstream_model: config.upstream_model.clone(),
        upstream_url: config.upstream_url.as_str().parse()?,
        show_think_tags: config.show_think_tags,
    };

    let cookies = CookiePool::new(config.cookies.clone());
    cookies.spawn_recovery_sweep(Duration::from_secs(config.cookie_recovery_interval_secs));

    let app_state = AppState::new(
        settings,
        cookies,
        config.pool_max_idle_per_host,
        Duration::from_secs(config.pool_idle_timeout_secs),
    );
    let router = build_router(app_state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Z.AI proxy listening on {}", bind_addr);

    axum::serve(listener, router).await?;

    Ok(())
}
