//! Per-run stop signalling.
//!
//! Each start of a run loop gets a fresh [`RunToken`] from the service's
//! [`GenerationClock`]. A stop request is only a signal: the loop decides
//! where it observes it.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Issues one [`RunToken`] per run-loop start, numbered from 1.
#[derive(Debug, Default)]
pub struct GenerationClock {
	issued: AtomicU64,
}

impl GenerationClock {
	pub fn new() -> Self {
		Self::default()
	}

	/// Token for the next run.
	pub fn issue(&self) -> RunToken {
		let generation = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
		RunToken {
			generation,
			stop: CancellationToken::new(),
		}
	}

	/// Generation of the latest token, or 0 before the first.
	pub fn last_issued(&self) -> u64 {
		self.issued.load(Ordering::Acquire)
	}
}

/// Stop request for one run of a service loop. Clones share the signal.
#[derive(Debug, Clone)]
pub struct RunToken {
	generation: u64,
	stop: CancellationToken,
}

impl RunToken {
	pub const fn generation(&self) -> u64 {
		self.generation
	}

	pub fn request_stop(&self) {
		self.stop.cancel();
	}

	pub fn stop_requested(&self) -> bool {
		self.stop.is_cancelled()
	}

	/// Resolves once a stop has been requested.
	pub async fn stopped(&self) {
		self.stop.cancelled().await;
	}
}
