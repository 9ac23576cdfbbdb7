use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use svchost_worker::BoundedExecutor;

use crate::{ConfigProperties, HostError, Service, ServiceError, ServiceState};

/// Deadline for every control call made through a [`ManagedServer`].
pub const CALL_DEADLINE: Duration = Duration::from_secs(15);

/// Control-plane wrapper around one exclusively owned service.
///
/// Every control call runs on its own bounded task and returns within
/// [`CALL_DEADLINE`]. Failures never cross this boundary as errors: the call
/// reports `false`/`None` and the cause is kept as [`Self::last_error`]. A
/// call that times out is not cancelled and may still finish later.
pub struct ManagedServer {
	id: String,
	origin: String,
	service: RwLock<Option<Arc<dyn Service>>>,
	last_error: Mutex<Option<HostError>>,
	executor: BoundedExecutor,
}

impl ManagedServer {
	/// Takes ownership of `service` and derives the instance id from it.
	///
	/// `origin` labels where the service came from (a resolver description,
	/// `local` for objects built by the caller).
	pub async fn wrap(service: Box<dyn Service>, origin: impl Into<String>, executor: BoundedExecutor) -> Result<Self, HostError> {
		let service: Arc<dyn Service> = Arc::from(service);
		let origin = origin.into();
		let probe = Arc::clone(&service);
		let service_id = executor.run_with_deadline("instance_id", CALL_DEADLINE, async move { probe.instance_id() }).await?;
		let id = format!("{service_id}/{origin}");
		tracing::debug!(%id, type_name = service.type_name(), "host.server.wrapped");
		Ok(Self {
			id,
			origin,
			service: RwLock::new(Some(service)),
			last_error: Mutex::new(None),
			executor,
		})
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn origin(&self) -> &str {
		&self.origin
	}

	pub async fn start(&self) -> bool {
		self.bounded("start", |svc| async move { svc.start().await }).await.is_some()
	}

	pub async fn stop(&self) -> bool {
		self.bounded("stop", |svc| async move { svc.stop().await }).await.is_some()
	}

	pub async fn pause(&self) -> bool {
		self.bounded("pause", |svc| async move { svc.pause().await }).await.is_some()
	}

	pub async fn resume(&self) -> bool {
		self.bounded("resume", |svc| async move { svc.resume().await }).await.is_some()
	}

	/// Current state of the service; STOPPED once killed.
	pub async fn state(&self) -> Option<ServiceState> {
		if self.is_killed() {
			return Some(ServiceState::Stopped);
		}
		self.bounded("state", |svc| async move { Ok(svc.state()) }).await
	}

	/// Asks the service for its own id (the first part of [`Self::id`]).
	pub async fn query_instance_id(&self) -> Option<String> {
		self.bounded("instance_id", |svc| async move { Ok(svc.instance_id()) }).await
	}

	pub fn config_info(&self) -> Option<ConfigProperties> {
		self.current().map(|svc| svc.config_info())
	}

	pub fn set_config_info(&self, config: ConfigProperties) {
		if let Some(svc) = self.current() {
			svc.set_config_info(config);
		}
	}

	/// Most recent failure of any control call.
	pub fn last_error(&self) -> Option<HostError> {
		self.last_error.lock().clone()
	}

	pub fn is_killed(&self) -> bool {
		self.service.read().is_none()
	}

	/// Drops the owned service without a graceful stop.
	///
	/// Runs the service's forced teardown hook first. Calls still in flight
	/// keep their own reference until they end. Returns `false` if the
	/// server was already killed.
	pub fn kill(&self) -> bool {
		let Some(service) = self.service.write().take() else {
			return false;
		};
		service.kill();
		tracing::info!(id = %self.id, "host.server.killed");
		true
	}

	fn current(&self) -> Option<Arc<dyn Service>> {
		self.service.read().clone()
	}

	fn record(&self, err: HostError) {
		tracing::error!(id = %self.id, error = %err, "host.server.call_failed");
		*self.last_error.lock() = Some(err);
	}

	async fn bounded<T, F, Fut>(&self, operation: &'static str, call: F) -> Option<T>
	where
		F: FnOnce(Arc<dyn Service>) -> Fut,
		Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
		T: Send + 'static,
	{
		let Some(service) = self.current() else {
			self.record(HostError::Killed { operation });
			return None;
		};
		match self.executor.run_with_deadline(operation, CALL_DEADLINE, call(service)).await {
			Ok(Ok(value)) => Some(value),
			Ok(Err(err)) => {
				self.record(HostError::from_service(operation, err));
				None
			}
			Err(err) => {
				self.record(err.into());
				None
			}
		}
	}
}

impl std::fmt::Debug for ManagedServer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ManagedServer")
			.field("id", &self.id)
			.field("killed", &self.is_killed())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicBool, Ordering};

	use async_trait::async_trait;

	use super::*;
	use crate::{RunContext, RunLoop, ThreadedService};

	struct Idle;

	#[async_trait]
	impl RunLoop for Idle {
		async fn run(&self, ctx: RunContext) {
			ctx.cancelled().await;
		}
	}

	/// Service whose control calls misbehave on demand.
	struct Faulty {
		hang_start: bool,
		fail_stop: bool,
		finished_start: Arc<AtomicBool>,
		state: Mutex<ServiceState>,
	}

	impl Faulty {
		fn new() -> Self {
			Self {
				hang_start: false,
				fail_stop: false,
				finished_start: Arc::new(AtomicBool::new(false)),
				state: Mutex::new(ServiceState::Stopped),
			}
		}
	}

	#[async_trait]
	impl Service for Faulty {
		fn type_name(&self) -> &str {
			"Faulty"
		}

		async fn start(&self) -> Result<(), ServiceError> {
			if self.hang_start {
				tokio::time::sleep(Duration::from_secs(60)).await;
			}
			*self.state.lock() = ServiceState::Running;
			self.finished_start.store(true, Ordering::SeqCst);
			Ok(())
		}

		async fn stop(&self) -> Result<(), ServiceError> {
			if self.fail_stop {
				return Err(ServiceError::failed("disk on fire"));
			}
			*self.state.lock() = ServiceState::Stopped;
			Ok(())
		}

		async fn pause(&self) -> Result<(), ServiceError> {
			explode();
			Ok(())
		}

		async fn resume(&self) -> Result<(), ServiceError> {
			Ok(())
		}

		fn state(&self) -> ServiceState {
			*self.state.lock()
		}

		fn instance_id(&self) -> String {
			"Faulty:1.0:0".to_string()
		}

		fn config_info(&self) -> ConfigProperties {
			ConfigProperties::new()
		}

		fn set_config_info(&self, _config: ConfigProperties) {}
	}

	fn explode() {
		panic!("pause exploded");
	}

	async fn wrap(service: impl Service) -> ManagedServer {
		ManagedServer::wrap(Box::new(service), "local", BoundedExecutor::default()).await.unwrap()
	}

	#[tokio::test(start_paused = true)]
	async fn control_calls_drive_the_service() {
		let server = wrap(ThreadedService::new("Idle", Idle)).await;
		assert!(server.id().starts_with("Idle:1.0:"));
		assert!(server.id().ends_with("/local"));
		assert_eq!(server.query_instance_id().await.as_deref(), server.id().strip_suffix("/local"));

		assert!(server.start().await);
		assert_eq!(server.state().await, Some(ServiceState::Running));
		assert!(server.pause().await);
		assert_eq!(server.state().await, Some(ServiceState::Paused));
		assert!(server.resume().await);
		assert!(server.stop().await);
		assert_eq!(server.state().await, Some(ServiceState::Stopped));
		assert_eq!(server.last_error(), None);
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_records_error_and_leaves_call_running() {
		let faulty = Faulty {
			hang_start: true,
			..Faulty::new()
		};
		let finished = Arc::clone(&faulty.finished_start);
		let server = wrap(faulty).await;

		let started = tokio::time::Instant::now();
		assert!(!server.start().await);
		assert!(started.elapsed() >= CALL_DEADLINE);
		assert_eq!(
			server.last_error(),
			Some(HostError::Timeout {
				operation: "start",
				deadline: CALL_DEADLINE,
			})
		);
		assert!(!finished.load(Ordering::SeqCst));

		tokio::time::sleep(Duration::from_secs(60)).await;
		assert!(finished.load(Ordering::SeqCst), "timed out call kept running");
		assert_eq!(server.state().await, Some(ServiceState::Running));
	}

	#[tokio::test]
	async fn failures_and_panics_are_recorded_not_raised() {
		let server = wrap(Faulty {
			fail_stop: true,
			..Faulty::new()
		})
		.await;

		assert!(!server.stop().await);
		assert!(matches!(server.last_error(), Some(HostError::Execution { operation: "stop", ref message }) if message == "disk on fire"));

		assert!(!server.pause().await);
		match server.last_error() {
			Some(HostError::Execution { operation, message }) => {
				assert_eq!(operation, "pause");
				assert!(message.contains("pause exploded"), "{message}");
			}
			other => panic!("unexpected last error {other:?}"),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn reentrant_start_is_a_state_conflict() {
		let server = wrap(ThreadedService::new("Idle", Idle)).await;
		assert!(server.start().await);
		assert!(!server.start().await);
		assert!(server.last_error().is_some_and(|err| err.is_state_conflict()));
		assert_eq!(server.state().await, Some(ServiceState::Running));
		assert!(server.kill());
	}

	#[tokio::test(start_paused = true)]
	async fn killed_server_reports_stopped_and_refuses_calls() {
		let server = wrap(ThreadedService::new("Idle", Idle)).await;
		assert!(server.start().await);
		assert!(server.kill());
		assert!(!server.kill());

		assert!(server.is_killed());
		assert_eq!(server.state().await, Some(ServiceState::Stopped));
		assert!(server.config_info().is_none());
		assert!(!server.start().await);
		assert_eq!(server.last_error(), Some(HostError::Killed { operation: "start" }));
	}
}
