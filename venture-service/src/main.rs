use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use venture_flow::Settings;
use venture_service::create_app;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "venture_service=debug,venture_flow=debug,tower_http=debug".into());

    let pretty = std::env::var("LOG_FORMAT").is_ok_and(|f| f == "pretty");
    if pretty {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_level(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = Settings::from_env().context("invalid configuration")?;
    info!(settings = ?settings, "Loaded settings");
    let runner = settings
        .build_runner()
        .context("failed to assemble analysis runner")?;

    let app = create_app(runner);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?;
    let addr = listener.local_addr()?;

    info!("AI Venture Agent starting on {}", addr);
    info!("Analysis endpoint: POST http://{}/analyze", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
