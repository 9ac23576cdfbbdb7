//! Exit tracking for run-loop tasks.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::{TaskClass, join_error_panic_message, spawn};

/// How a run-loop task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
	/// The loop returned.
	Returned,
	/// The loop panicked with this message.
	Panicked(String),
	/// The task was aborted before it returned.
	Aborted,
}

/// Handle on a spawned run loop that records how it ended.
///
/// Any number of callers can wait for the exit, each with its own deadline.
/// A missed deadline leaves the task running.
#[derive(Debug)]
pub struct TaskJoin {
	exit: watch::Receiver<Option<TaskExit>>,
	abort: AbortHandle,
}

impl TaskJoin {
	/// Spawns `fut` and watches for its exit.
	pub fn spawn<F>(class: TaskClass, fut: F) -> Self
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let handle = spawn(class, fut);
		let abort = handle.abort_handle();
		let (report, exit) = watch::channel(None);
		spawn(class, async move {
			let outcome = match handle.await {
				Ok(()) => TaskExit::Returned,
				Err(err) if err.is_cancelled() => TaskExit::Aborted,
				Err(err) => {
					let message = join_error_panic_message(err).unwrap_or_default();
					tracing::warn!(%class, %message, "worker.join.panicked");
					TaskExit::Panicked(message)
				}
			};
			report.send_replace(Some(outcome));
		});
		Self { exit, abort }
	}

	/// Returns `true` once the task has stopped running.
	pub fn is_finished(&self) -> bool {
		self.abort.is_finished()
	}

	/// How the task ended, once that has been observed.
	pub fn exit(&self) -> Option<TaskExit> {
		self.exit.borrow().clone()
	}

	/// Drops the task at its next await point.
	pub fn abort(&self) {
		self.abort.abort();
	}

	/// Waits up to `timeout` for the task to end. `None` means it is still running.
	pub async fn join_with_timeout(&self, timeout: Duration) -> Option<TaskExit> {
		let mut exit = self.exit.clone();
		match tokio::time::timeout(timeout, exit.wait_for(Option::is_some)).await {
			Ok(Ok(seen)) => (*seen).clone(),
			// The watcher went away with its runtime.
			Ok(Err(_)) => Some(TaskExit::Aborted),
			Err(_) => None,
		}
	}
}
