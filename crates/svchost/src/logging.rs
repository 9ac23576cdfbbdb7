use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs stdout and append-only file logging.
///
/// Both sinks prefix every line with a timestamp and the emitting thread.
/// File writes are serialized through a mutex so lines from concurrent
/// writers never interleave.
pub fn init(log_file: &Path, verbose: bool) -> anyhow::Result<()> {
	let file = OpenOptions::new()
		.create(true)
		.append(true)
		.open(log_file)
		.with_context(|| format!("opening log file {}", log_file.display()))?;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("svchost=debug,svchost_host=debug,svchost_resolver=debug,svchost_worker=debug,info")
		} else {
			EnvFilter::new("info")
		}
	});

	let stdout_layer = tracing_subscriber::fmt::layer()
		.with_writer(std::io::stdout)
		.with_thread_names(true)
		.with_thread_ids(true)
		.with_target(false);

	let file_layer = tracing_subscriber::fmt::layer()
		.with_writer(Mutex::new(file))
		.with_ansi(false)
		.with_thread_names(true)
		.with_thread_ids(true)
		.with_target(true);

	tracing_subscriber::registry()
		.with(filter)
		.with(stdout_layer)
		.with(file_layer)
		.try_init()
		.context("installing tracing subscriber")?;

	tracing::info!(path = %log_file.display(), "svchost.logging.ready");
	Ok(())
}
