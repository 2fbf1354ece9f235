use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_server::{AppConfig, Runtime};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "vigil.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if std::path::Path::new(&args.config).exists() {
        AppConfig::load(&args.config)?
    } else {
        AppConfig::default()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VIGIL control loop server");

    let mut runtime = Runtime::build(config)?;
    runtime.start().await?;

    let app = vigil_api::create_router(runtime.state.clone());

    let addr = format!(
        "{}:{}",
        runtime.config.server.host, runtime.config.server.port
    );
    tracing::info!("HTTP API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
