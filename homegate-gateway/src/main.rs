use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Report, eyre};
use homegate_gateway::{Config, Gateway, MdnsBrowser, SysfsBattery, api};
use homegate_shelly::HttpTransport;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "homegate")]
#[command(about = "Home gateway: device discovery, load shedding and heating control")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "homegate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let (config, created) = load_or_default(&cli.config)?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        config
            .log_level
            .clone()
            .unwrap_or_else(|| "homegate=info,homegate_gateway=info,homegate_shelly=info".to_owned())
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    if created {
        match config.save(&cli.config) {
            Ok(()) => info!(path = ?cli.config, "No configuration file found, wrote defaults"),
            Err(e) => warn!(path = ?cli.config, error = %e, "Could not write default configuration"),
        }
    }

    info!(
        path = ?cli.config,
        http_addr = %config.server.http_addr,
        max_power_w = config.energy.max_power_w,
        devices = config.devices.len(),
        "Starting homegate"
    );

    let transport = Arc::new(HttpTransport::with_timeout(config.http.timeout())?);
    let browser = MdnsBrowser::new(&config.discovery)?;
    let http_addr = config.server.http_addr;

    let (mut gateway, handle) = Gateway::new(config, transport, Box::new(browser))?;
    gateway = gateway.with_config_path(&cli.config);
    match SysfsBattery::detect(Path::new(SysfsBattery::CLASS_DIR)) {
        Some(battery) => {
            info!(?battery, "Using host battery");
            gateway = gateway.with_battery(Box::new(battery));
        }
        None => info!("No host battery found"),
    }

    let cancel = CancellationToken::new();
    let mut gateway_task = tokio::spawn(gateway.run(cancel.clone()));

    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();
    tokio::select! {
        result = axum::serve(listener, api::router(handle)).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
            cancel.cancel();
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
        result = &mut gateway_task => {
            cancel.cancel();
            let report = match result {
                Ok(()) => eyre!("control loop stopped unexpectedly"),
                Err(e) => Report::new(e).wrap_err("control loop task failed"),
            };
            error!(error = ?report, "Control loop ended, shutting down");
            return Err(report);
        }
    }

    if let Err(e) = gateway_task.await {
        error!(error = ?e, "Control loop task failed");
    }

    info!("homegate shut down complete");
    Ok(())
}

/// Load the configuration, or the defaults when the file does not exist yet.
fn load_or_default(path: &Path) -> color_eyre::Result<(Config, bool)> {
    if path.exists() {
        Ok((Config::load(path)?, false))
    } else {
        Ok((Config::default(), true))
    }
}
