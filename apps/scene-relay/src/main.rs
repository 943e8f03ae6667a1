mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use crate::cli::{Cli, Commands};
use scene_relay::{build_router, telemetry, AppConfig, AppState};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    telemetry::init_tracing(&config.log_filter);

    let result = match cli.command {
        Some(Commands::Send {
            url,
            action,
            target,
            params,
            wait,
        }) => cli::run_send(url, action, target, params, wait).await,
        Some(Commands::Serve(args)) => {
            args.apply(&mut config);
            serve(config).await
        }
        None => serve(config).await,
    };

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!(
        addr = %config.bind_addr,
        frontend_url = %config.frontend_url,
        browser = %config.browser_type,
        headless = config.headless,
        strict = config.strict_verdicts,
        require_init = config.session_require_init,
        "starting scene-relay"
    );

    let addr = config.bind_addr;
    let state = AppState::from_config(config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("scene-relay listening on {}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
