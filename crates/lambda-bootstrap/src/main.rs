//! Lambda Bootstrap - Main entry point
//!
//! This is the container's main process that:
//! - Loads the control API address from the environment
//! - Initializes the handler once
//! - Runs the invocation loop until the host kills the process

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lambda_bootstrap::{app, runtime, HttpRuntimeApi, RuntimeConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // All log output goes to stdout, where the platform collects it
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,lambda_bootstrap=debug".into()))
        .with(tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(false))
        .init();
    runtime::log_panics();

    let config = RuntimeConfig::from_env()?;
    tracing::info!(
        api_address = %config.api_address,
        api_version = %config.api_version,
        "Starting runtime"
    );

    let api = HttpRuntimeApi::new(&config);
    match runtime::start(api, app::init).await? {}
}
