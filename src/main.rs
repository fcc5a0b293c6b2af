use codedrop::{app, config::Config, AppState};
use tracing_subscriber::{prelude::*, EnvFilter};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_logging();

    let state = AppState::from_config(&config).await?;
    tracing::info!(
        mode = state.mode.as_str(),
        storage = state.storage.backend_name(),
        database = %config.database_url,
        "starting file share api"
    );

    let app = app(state, config.frontend_url.as_deref());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
