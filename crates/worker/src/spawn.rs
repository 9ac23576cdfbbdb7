use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::TaskClass;

/// Runtime for callers outside any tokio context, such as a registry used
/// from a plain thread.
fn fallback_runtime() -> Handle {
	static FALLBACK: OnceLock<Runtime> = OnceLock::new();
	FALLBACK
		.get_or_init(|| {
			Builder::new_multi_thread()
				.enable_all()
				.worker_threads(2)
				.thread_name("svchost-fallback")
				.build()
				.expect("failed to build svchost fallback runtime")
		})
		.handle()
		.clone()
}

fn runtime_handle() -> Handle {
	Handle::try_current().unwrap_or_else(|_| fallback_runtime())
}

/// Spawns host work on the ambient runtime.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(%class, "worker.spawn");
	runtime_handle().spawn(fut)
}

/// Runs blocking filesystem work on the blocking pool.
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(class = %TaskClass::IoBlocking, "worker.spawn_blocking");
	runtime_handle().spawn_blocking(f)
}
