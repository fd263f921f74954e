use autoclaim_service::{Config, create_app, init_tracing};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    let app = create_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("AutoClaim engine running on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
