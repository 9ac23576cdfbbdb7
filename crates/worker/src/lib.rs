//! Shared task runtime primitives for the service host.
//!
//! Everything that spawns work goes through [`spawn`] so tasks land on the
//! active runtime (or a lazily built fallback one). Control calls against
//! hosted services go through [`BoundedExecutor`]. Run loops are spawned as a
//! [`TaskJoin`], which records their [`TaskExit`], and are asked to stop
//! through their [`RunToken`].

mod bounded;
mod class;
mod join;
mod spawn;
mod token;

pub use bounded::{BoundedCallError, BoundedExecutor, DEFAULT_MAX_IN_FLIGHT};
pub use class::TaskClass;
pub use join::{TaskExit, TaskJoin};
pub use spawn::{spawn, spawn_blocking};
pub use token::{GenerationClock, RunToken};

/// Extracts the panic message carried by a failed join, if it was a panic.
pub fn join_error_panic_message(err: tokio::task::JoinError) -> Option<String> {
	if !err.is_panic() {
		return None;
	}
	let payload = err.into_panic();
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return Some((*msg).to_string());
	}
	if let Some(msg) = payload.downcast_ref::<String>() {
		return Some(msg.clone());
	}
	Some("non-string panic payload".to_string())
}
