use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vertex_relay::config::config_search_paths;
use vertex_relay::{build_router, AppState, RelayConfig, SharedLogger};

#[derive(Parser)]
#[command(
    name = "vertex-relay",
    about = "OpenAI-compatible chat and embeddings endpoint backed by Vertex AI",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// GCP project id (overrides config)
    #[arg(long)]
    project: Option<String>,

    /// Vertex region, or "global" (overrides config)
    #[arg(long)]
    region: Option<String>,

    /// Log file path
    #[arg(long, default_value = "vertex-relay.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vertex_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = RelayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(project) = cli.project {
        config.vertex.project_id = project;
    }
    if let Some(region) = cli.region {
        config.vertex.region = region;
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    // A missing token is not fatal at startup; calls fail until it is exported.
    if let Err(e) = config.resolve_access_token() {
        warn!("{}", e);
    }

    let base_url = config.vertex.effective_base_url();

    info!("vertex-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Project:   {}", config.vertex.project_id);
    info!("  Region:    {}", config.vertex.region);
    info!("  Base URL:  {}", base_url);
    info!("  Port:      {}", config.port);
    info!("  Models:    {} aliased", config.models.len());
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting vertex-relay project={} region={} base_url={} port={}",
            config.vertex.project_id, config.vertex.region, base_url, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        client,
        logger,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://localhost:{}/v1", port);

    axum::serve(listener, app).await?;

    Ok(())
}
