use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use svchost_resolver::InMemoryResolver;

use super::*;
use crate::{RunContext, RunLoop, ServiceError, ThreadedService};

struct Idle;

#[async_trait]
impl RunLoop for Idle {
	async fn run(&self, ctx: RunContext) {
		ctx.cancelled().await;
	}
}

fn idle(name: &str) -> Box<dyn Service> {
	Box::new(ThreadedService::new(name, Idle))
}

#[derive(Default)]
struct Script {
	fail_start: bool,
	hang_start: bool,
	fail_stop: bool,
}

/// Hand-driven service with a fixed id that counts its stop calls.
struct Scripted {
	id: String,
	script: Script,
	stops: Arc<AtomicUsize>,
	state: Mutex<ServiceState>,
	config: Mutex<ConfigProperties>,
}

impl Scripted {
	fn new(id: &str, script: Script) -> Self {
		Self {
			id: id.to_string(),
			script,
			stops: Arc::new(AtomicUsize::new(0)),
			state: Mutex::new(ServiceState::Stopped),
			config: Mutex::new(ConfigProperties::new()),
		}
	}
}

#[async_trait]
impl Service for Scripted {
	fn type_name(&self) -> &str {
		"Scripted"
	}

	async fn start(&self) -> Result<(), ServiceError> {
		if self.script.hang_start {
			tokio::time::sleep(Duration::from_secs(120)).await;
		}
		if self.script.fail_start {
			return Err(ServiceError::failed("port already bound"));
		}
		*self.state.lock() = ServiceState::Running;
		Ok(())
	}

	async fn stop(&self) -> Result<(), ServiceError> {
		self.stops.fetch_add(1, Ordering::SeqCst);
		if self.script.fail_stop {
			return Err(ServiceError::failed("refusing to stop"));
		}
		*self.state.lock() = ServiceState::Stopped;
		Ok(())
	}

	async fn pause(&self) -> Result<(), ServiceError> {
		*self.state.lock() = ServiceState::Paused;
		Ok(())
	}

	async fn resume(&self) -> Result<(), ServiceError> {
		*self.state.lock() = ServiceState::Running;
		Ok(())
	}

	fn state(&self) -> ServiceState {
		*self.state.lock()
	}

	fn instance_id(&self) -> String {
		self.id.clone()
	}

	fn config_info(&self) -> ConfigProperties {
		self.config.lock().clone()
	}

	fn set_config_info(&self, config: ConfigProperties) {
		*self.config.lock() = config;
	}
}

fn echo_registry() -> ServiceRegistry {
	let registry = ServiceRegistry::new();
	registry.register_factory("Echo", |_: &Bytes| Ok(idle("Echo")));
	registry
}

#[tokio::test(start_paused = true)]
async fn echo_is_added_running_then_killed() {
	let registry = echo_registry();
	registry.deploy_service("Echo", Arc::new(InMemoryResolver::new().with("Echo", &b"B"[..])));

	let server = registry.add_service_by_name("Echo", ConfigProperties::new()).await.unwrap();
	let id = server.id().to_string();
	assert!(!id.is_empty());
	assert!(id.ends_with("/in-memory"));
	assert_eq!(server.state().await, Some(ServiceState::Running));
	assert_eq!(registry.get_services(), vec![id.clone()]);

	assert!(registry.kill_service(&id));
	assert!(registry.get_service(&id).is_none());
	assert!(server.is_killed());
	assert!(!registry.kill_service(&id));
}

#[tokio::test]
async fn name_resolution_failures_are_reported() {
	let registry = echo_registry();
	let err = registry.load_service_by_name("Echo").await.unwrap_err();
	assert!(matches!(err, HostError::Resolution { ref reason, .. } if reason == "no resolver deployed"));

	registry.deploy_service("Echo", Arc::new(InMemoryResolver::new()));
	assert!(matches!(registry.load_service_by_name("Echo").await, Err(HostError::Resolution { .. })));

	registry.deploy_service("Ghost", Arc::new(InMemoryResolver::new().with("Ghost", &b"code"[..])));
	let err = registry.add_service_by_name("Ghost", ConfigProperties::new()).await.unwrap_err();
	assert!(err.to_string().contains("no factory registered for 'Ghost'"), "{err}");
	assert!(registry.is_empty());
}

#[tokio::test]
async fn redeploying_overwrites_the_resolver() {
	let registry = echo_registry();
	registry.deploy_service("Echo", Arc::new(InMemoryResolver::new()));
	registry.deploy_service("Echo", Arc::new(InMemoryResolver::new().with("Echo", &b"v2"[..])));

	let server = registry.load_service_by_name("Echo").await.unwrap();
	assert_eq!(server.state().await, Some(ServiceState::Stopped), "loading does not start");
}

#[tokio::test]
async fn failed_start_rolls_back_registration() {
	let registry = ServiceRegistry::new();
	let service = Scripted::new(
		"Scripted:1",
		Script {
			fail_start: true,
			..Script::default()
		},
	);
	let err = registry.add_service(Box::new(service), ConfigProperties::new()).await.unwrap_err();
	assert_eq!(
		err,
		HostError::Execution {
			operation: "start",
			message: "port already bound".to_string(),
		}
	);
	assert!(registry.is_empty());
	assert!(registry.get_service("Scripted:1/local").is_none());
}

#[tokio::test(start_paused = true)]
async fn hanging_start_times_out_and_rolls_back() {
	let registry = ServiceRegistry::new();
	let service = Scripted::new(
		"Scripted:slow",
		Script {
			hang_start: true,
			..Script::default()
		},
	);
	let err = registry.add_service(Box::new(service), ConfigProperties::new()).await.unwrap_err();
	assert!(err.is_timeout());
	assert!(registry.is_empty());
}

#[tokio::test]
async fn add_applies_configuration() {
	let registry = ServiceRegistry::new();
	let config = ConfigProperties::new().with("port", "8080");
	let server = registry.add_service(Box::new(Scripted::new("Scripted:cfg", Script::default())), config.clone()).await.unwrap();
	assert_eq!(server.config_info(), Some(config));
}

#[tokio::test]
async fn remove_unknown_id_is_a_no_op() {
	let registry = ServiceRegistry::new();
	registry.add_service(idle("Idle"), ConfigProperties::new()).await.unwrap();
	assert!(!registry.remove_service("nobody/local").await);
	assert_eq!(registry.len(), 1);
	registry.shutdown().await;
}

#[tokio::test]
async fn remove_stops_live_services_and_removes_regardless() {
	let registry = ServiceRegistry::new();

	let healthy = Scripted::new("Scripted:a", Script::default());
	let healthy_stops = Arc::clone(&healthy.stops);
	let stuck = Scripted::new(
		"Scripted:b",
		Script {
			fail_stop: true,
			..Script::default()
		},
	);
	let stuck_stops = Arc::clone(&stuck.stops);
	let a = registry.add_service(Box::new(healthy), ConfigProperties::new()).await.unwrap();
	let b = registry.add_service(Box::new(stuck), ConfigProperties::new()).await.unwrap();

	assert!(registry.remove_service(a.id()).await);
	assert_eq!(healthy_stops.load(Ordering::SeqCst), 1);

	assert!(registry.remove_service(b.id()).await);
	assert_eq!(stuck_stops.load(Ordering::SeqCst), 1);
	assert!(b.last_error().is_some());
	assert!(registry.is_empty());
}

#[tokio::test]
async fn remove_skips_stop_for_stopped_or_paused() {
	let registry = ServiceRegistry::new();
	let loaded = Scripted::new("Scripted:loaded", Script::default());
	let loaded_stops = Arc::clone(&loaded.stops);
	let paused = Scripted::new("Scripted:paused", Script::default());
	let paused_stops = Arc::clone(&paused.stops);

	let loaded = registry.load_service(Box::new(loaded)).await.unwrap();
	let paused = registry.add_service(Box::new(paused), ConfigProperties::new()).await.unwrap();
	assert!(paused.pause().await);

	assert!(registry.remove_service(loaded.id()).await);
	assert!(registry.remove_service(paused.id()).await);
	assert_eq!(loaded_stops.load(Ordering::SeqCst), 0);
	assert_eq!(paused_stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_instance_ids_are_rejected() {
	let registry = ServiceRegistry::new();
	registry.load_service(Box::new(Scripted::new("Scripted:same", Script::default()))).await.unwrap();
	let err = registry
		.load_service(Box::new(Scripted::new("Scripted:same", Script::default())))
		.await
		.unwrap_err();
	assert_eq!(err, HostError::DuplicateInstance("Scripted:same/local".to_string()));
	assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn listing_and_shutdown_follow_registration_order() {
	let registry = ServiceRegistry::new();
	for id in ["Scripted:1", "Scripted:2", "Scripted:3"] {
		registry.add_service(Box::new(Scripted::new(id, Script::default())), ConfigProperties::new()).await.unwrap();
	}
	let stuck = Scripted::new(
		"Scripted:4",
		Script {
			fail_stop: true,
			..Script::default()
		},
	);
	registry.add_service(Box::new(stuck), ConfigProperties::new()).await.unwrap();

	assert_eq!(
		registry.directory_listing(),
		"{\n   Scripted:1/local\n   Scripted:2/local\n   Scripted:3/local\n   Scripted:4/local\n}"
	);
	registry.remove_service("Scripted:2/local").await;
	assert_eq!(registry.get_services(), vec!["Scripted:1/local", "Scripted:3/local", "Scripted:4/local"]);

	registry.shutdown().await;
	assert!(registry.is_empty());
	assert_eq!(registry.directory_listing(), "{\n}");
}

#[tokio::test]
async fn local_factory_services_skip_resolution() {
	let registry = echo_registry();
	let server = registry.add_local_service("Echo", ConfigProperties::new()).await.unwrap();
	assert!(server.id().ends_with("/factory"));
	assert!(registry.add_local_service("Missing", ConfigProperties::new()).await.is_err());
	registry.shutdown().await;
}

#[test]
fn second_install_is_rejected_and_first_stays() {
	let slot = RegistrySlot::new();
	assert!(slot.get().is_none());

	let first = slot.install(Arc::new(ServiceRegistry::new())).unwrap();
	let err = slot.install(Arc::new(ServiceRegistry::new())).unwrap_err();
	assert_eq!(err, HostError::SingletonViolation);
	assert!(Arc::ptr_eq(&slot.get().unwrap(), &first));
}
