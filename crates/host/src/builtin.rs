use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use svchost_resolver::InMemoryResolver;

use crate::{ConfigProperties, HostError, ManagedServer, RunContext, RunLoop, Service, ServiceRegistry, ThreadedService};

pub const TEST_SERVICE: &str = "TestService";
pub const HEARTBEAT: &str = "Heartbeat";

/// Blob deployed for the self-test service.
pub const TEST_SERVICE_CODE: &[u8] = &[0xCA, 0xFE, 0xBA, 0xBE];

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

const IDLE_TICK: Duration = Duration::from_millis(500);

/// Trivial service that idles until stopped, honouring pause.
#[derive(Debug, Default)]
pub struct TestService;

#[async_trait]
impl RunLoop for TestService {
	async fn run(&self, mut ctx: RunContext) {
		tracing::info!(generation = ctx.generation(), "builtin.test.running");
		while ctx.wait_while_paused().await {
			tokio::select! {
				_ = ctx.cancelled() => break,
				_ = tokio::time::sleep(IDLE_TICK) => {}
			}
		}
		tracing::info!(generation = ctx.generation(), "builtin.test.stopped");
	}
}

/// Logs a beat every `interval-ms` milliseconds while running.
#[derive(Debug, Default)]
pub struct Heartbeat {
	beats: Arc<AtomicU64>,
}

impl Heartbeat {
	pub fn beats(&self) -> u64 {
		self.beats.load(Ordering::Relaxed)
	}

	fn interval(config: &ConfigProperties) -> Duration {
		let Some(raw) = config.get("interval-ms") else {
			return DEFAULT_HEARTBEAT_INTERVAL;
		};
		match raw.trim().parse::<u64>() {
			Ok(ms) if ms > 0 => Duration::from_millis(ms),
			_ => {
				tracing::warn!(value = raw, "builtin.heartbeat.bad_interval");
				DEFAULT_HEARTBEAT_INTERVAL
			}
		}
	}
}

#[async_trait]
impl RunLoop for Heartbeat {
	async fn run(&self, mut ctx: RunContext) {
		let interval = Self::interval(ctx.config());
		while ctx.wait_while_paused().await {
			tokio::select! {
				_ = ctx.cancelled() => break,
				_ = tokio::time::sleep(interval) => {
					let beat = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
					tracing::info!(beat, generation = ctx.generation(), "builtin.heartbeat.beat");
				}
			}
		}
	}
}

/// Registers factories for the builtin services.
pub fn register_builtins(registry: &ServiceRegistry) {
	registry.register_factory(TEST_SERVICE, |_| Ok(boxed(ThreadedService::new(TEST_SERVICE, TestService))));
	registry.register_factory(HEARTBEAT, |_| Ok(boxed(ThreadedService::new(HEARTBEAT, Heartbeat::default()))));
}

fn boxed(service: impl Service) -> Box<dyn Service> {
	Box::new(service)
}

/// Deploys the test service through an in-memory resolver and adds it.
pub async fn self_test(registry: &ServiceRegistry) -> Result<Arc<ManagedServer>, HostError> {
	if !registry.factories().contains(TEST_SERVICE) {
		register_builtins(registry);
	}
	registry.deploy_service(TEST_SERVICE, Arc::new(InMemoryResolver::new().with(TEST_SERVICE, TEST_SERVICE_CODE)));
	registry.add_service_by_name(TEST_SERVICE, ConfigProperties::new()).await
}
