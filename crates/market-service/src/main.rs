//! Main entry point for the marketplace engine service.
//!
//! This binary wires the configured storage backend into the engine,
//! starts the confirmation sweeper and serves the HTTP API through which
//! buyers, publishers and admins drive the order lifecycle.

use clap::Parser;
use market_config::Config;
use market_core::{ConfirmationSweeper, EngineBuilder, MarketEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod apis;
mod server;

/// Command-line arguments for the marketplace service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the marketplace service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the engine with the configured storage backend
/// 5. Runs the sweeper and the API server until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));

	fmt()
		.with_env_filter(env_filter)
		.with_target(true)
		.init();

	// Load configuration
	let config = Config::from_file(&args.config)?;
	tracing::info!("Loaded configuration [{}]", config.market.id);

	let sweep_interval = Duration::from_secs(config.market.sweep_interval_seconds);
	let api_config = config.api.clone();

	// Build the engine with all storage backends registered
	let engine: Arc<MarketEngine> = Arc::new(
		EngineBuilder::new(config)
			.with_default_storage_factories()
			.build()?,
	);

	// Start the confirmation sweeper
	let sweeper = ConfirmationSweeper::new(engine.clone(), sweep_interval);
	let sweeper_handle = tokio::spawn(async move {
		sweeper.run().await;
	});

	let api_enabled = api_config.as_ref().is_some_and(|api| api.enabled);
	if api_enabled {
		let api_config = api_config.ok_or("api config missing")?;
		server::start_server(api_config, engine).await?;
	} else {
		tracing::info!("API server disabled; running sweeper only");
		tokio::signal::ctrl_c().await?;
	}

	sweeper_handle.abort();
	Ok(())
}
