use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::{TaskClass, join_error_panic_message, spawn};

/// Default number of bounded calls allowed in flight at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// Failure of one deadline-bounded call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundedCallError {
	/// The call did not finish before its deadline. The underlying task was
	/// left running.
	#[error("{operation} did not complete within {deadline:?}")]
	TimedOut { operation: &'static str, deadline: Duration },
	/// The call panicked.
	#[error("{operation} panicked: {message}")]
	Panicked { operation: &'static str, message: String },
	/// The call's task was cancelled by the runtime.
	#[error("{operation} was cancelled")]
	Cancelled { operation: &'static str },
}

impl BoundedCallError {
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::TimedOut { .. })
	}
}

/// Shared executor for calls that must return within a deadline.
///
/// Every call runs as its own task, so a hung call never blocks another one.
/// A call that misses its deadline is detached rather than aborted and keeps
/// its concurrency permit until it finishes on its own.
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
	permits: Arc<Semaphore>,
	max_in_flight: usize,
	class: TaskClass,
}

impl Default for BoundedExecutor {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_IN_FLIGHT)
	}
}

impl BoundedExecutor {
	/// Creates an executor allowing at most `max_in_flight` concurrent calls.
	///
	/// # Panics
	///
	/// Panics if `max_in_flight` is zero.
	pub fn new(max_in_flight: usize) -> Self {
		assert!(max_in_flight > 0, "bounded executor needs at least one permit");
		Self {
			permits: Arc::new(Semaphore::new(max_in_flight)),
			max_in_flight,
			class: TaskClass::Control,
		}
	}

	/// Number of calls currently holding a permit, detached ones included.
	pub fn in_flight(&self) -> usize {
		self.max_in_flight.saturating_sub(self.permits.available_permits())
	}

	/// Runs `fut` on a fresh task and waits for it at most `deadline`.
	///
	/// Waiting for a free permit counts against the deadline.
	pub async fn run_with_deadline<F>(&self, operation: &'static str, deadline: Duration, fut: F) -> Result<F::Output, BoundedCallError>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		let expires = tokio::time::Instant::now() + deadline;

		// The semaphore is never closed, so acquiring only fails by deadline.
		let permit = match tokio::time::timeout_at(expires, Arc::clone(&self.permits).acquire_owned()).await {
			Ok(Ok(permit)) => permit,
			Ok(Err(_)) | Err(_) => {
				tracing::warn!(operation, ?deadline, "worker.bounded.permit_timeout");
				return Err(BoundedCallError::TimedOut { operation, deadline });
			}
		};

		let handle = spawn(self.class, async move {
			let _permit = permit;
			fut.await
		});

		match tokio::time::timeout_at(expires, handle).await {
			Ok(Ok(value)) => Ok(value),
			Ok(Err(err)) if err.is_cancelled() => Err(BoundedCallError::Cancelled { operation }),
			Ok(Err(err)) => {
				let message = join_error_panic_message(err).unwrap_or_else(|| "unknown join failure".to_string());
				tracing::error!(operation, %message, "worker.bounded.panicked");
				Err(BoundedCallError::Panicked { operation, message })
			}
			Err(_) => {
				// Dropping the JoinHandle detaches the task; it is not cancelled.
				tracing::warn!(operation, ?deadline, "worker.bounded.timeout");
				Err(BoundedCallError::TimedOut { operation, deadline })
			}
		}
	}
}
