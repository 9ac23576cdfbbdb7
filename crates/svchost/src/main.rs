//! Service container host process.
//!
//! Loads settings, installs the process registry, deploys configured
//! resolvers, preloads plugins, applies start-up directives and then serves
//! the operator console or waits for Ctrl-C.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use svchost_host::{HostSettings, ServiceRegistry, bootstrap, builtin, install_global};
use tracing::info;

mod console;
mod logging;
mod plugins;

/// Host command line arguments.
#[derive(Parser, Debug)]
#[command(name = "svchost")]
#[command(about = "In-process service container")]
struct Args {
	/// Settings file (TOML)
	#[arg(short, long, value_name = "FILE")]
	config: Option<PathBuf>,

	/// Log file, appended to
	#[arg(long, value_name = "FILE")]
	log_file: Option<PathBuf>,

	/// Plugin archive directory to preload
	#[arg(long, value_name = "DIR")]
	plugins: Option<PathBuf>,

	/// Run the interactive console on stdin
	#[arg(long)]
	console: bool,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,

	/// `@script`, `TEST`, or a directive such as "Heartbeat -interval-ms:500"
	args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let args = Args::parse();

	let settings = match &args.config {
		Some(path) => HostSettings::load(path).await?,
		None => HostSettings::default(),
	};
	let log_file = args.log_file.clone().unwrap_or_else(|| settings.log_file().to_path_buf());
	logging::init(&log_file, args.verbose)?;
	info!("svchost.starting");

	let registry = Arc::new(ServiceRegistry::new());
	builtin::register_builtins(&registry);
	if let Err(err) = install_global(Arc::clone(&registry)) {
		tracing::error!(error = %err, "svchost.singleton_violation");
		return Ok(ExitCode::from(1));
	}

	let deployed = settings.apply(&registry).context("deploying configured resolvers")?;
	info!(deployed, "svchost.resolvers_deployed");

	let _plugins = match args.plugins.as_ref().or(settings.plugin_dir.as_ref()) {
		Some(dir) => Some(plugins::preload(&registry, dir).await),
		None => None,
	};

	let mut report = bootstrap::run(&registry, &args.args).await;
	bootstrap::apply_directives(&registry, &settings.parsed_directives(), &mut report).await;
	info!(added = report.added.len(), failed = report.failures.len(), "svchost.bootstrapped");
	registry.log(registry.directory_listing());

	if args.console {
		let stdin = tokio::io::BufReader::new(tokio::io::stdin());
		let exit = console::run(&registry, stdin, tokio::io::stdout()).await?;
		info!(?exit, "svchost.console_closed");
	} else {
		tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
		info!("svchost.interrupted");
	}

	registry.shutdown().await;
	info!("svchost.stopped");
	Ok(ExitCode::SUCCESS)
}
