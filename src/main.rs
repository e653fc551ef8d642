use std::sync::Arc;

use clap::{Parser, Subcommand};
use gameserver_ingress_controller::config::ControllerArgs;
use gameserver_ingress_controller::telemetry::{self, TelemetryConfig};
use gameserver_ingress_controller::{controller, Error};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller
    Run(ControllerArgs),
    /// Show version and build information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("gameserver-ingress-controller v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_controller(run_args).await,
    }
}

async fn run_controller(args: ControllerArgs) -> Result<(), Error> {
    let config = args.into_config()?;

    telemetry::init_telemetry(&TelemetryConfig::new(config.log_format))
        .map_err(|e| Error::ConfigError(e.to_string()))?;

    info!(
        "Starting gameserver-ingress-controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let token = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(token.clone()));

    let state = Arc::new(controller::ControllerState::new(client, config, token));

    #[cfg(feature = "rest-api")]
    {
        let api_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = gameserver_ingress_controller::rest_api::run_server(api_state).await {
                tracing::error!("Health server error: {:?}", e);
            }
        });
    }

    let result = controller::run_controller(state).await;

    // Flush any remaining traces
    telemetry::shutdown_telemetry();

    result
}

/// Cancel `token` on SIGINT or SIGTERM
async fn shutdown_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received SIGINT");
    }

    token.cancel();
}
