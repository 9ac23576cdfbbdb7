//! Process-wide directory of managed servers and deployed resolvers.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use indexmap::map::Entry;
use parking_lot::RwLock;
use svchost_resolver::{Bytes, CodeResolver, FactoryTable};
use svchost_worker::BoundedExecutor;

use crate::{ConfigProperties, HostError, ManagedServer, Service, ServiceState};

/// Factory table building services from resolved blobs.
pub type ServiceFactories = FactoryTable<Box<dyn Service>>;

/// Origin label for services built by the caller.
pub const LOCAL_ORIGIN: &str = "local";

/// Origin label for services built from a factory without resolution.
pub const FACTORY_ORIGIN: &str = "factory";

/// Directory of managed servers keyed by instance id, plus the resolvers
/// deployed for name-based instantiation.
pub struct ServiceRegistry {
	servers: RwLock<IndexMap<String, Arc<ManagedServer>>>,
	resolvers: RwLock<HashMap<String, Arc<dyn CodeResolver>>>,
	factories: Arc<ServiceFactories>,
	executor: BoundedExecutor,
}

impl Default for ServiceRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl ServiceRegistry {
	pub fn new() -> Self {
		Self::with_executor(BoundedExecutor::default())
	}

	/// Creates a registry whose servers share `executor` for bounded calls.
	pub fn with_executor(executor: BoundedExecutor) -> Self {
		Self {
			servers: RwLock::new(IndexMap::new()),
			resolvers: RwLock::new(HashMap::new()),
			factories: Arc::new(FactoryTable::new()),
			executor,
		}
	}

	pub fn factories(&self) -> &Arc<ServiceFactories> {
		&self.factories
	}

	/// Registers the constructor used for services named `name`.
	pub fn register_factory<F>(&self, name: impl Into<String>, factory: F)
	where
		F: Fn(&Bytes) -> Result<Box<dyn Service>, String> + Send + Sync + 'static,
	{
		self.factories.register(name, factory);
	}

	/// Deploys `resolver` for `name`, replacing any previous deployment.
	pub fn deploy_service(&self, name: impl Into<String>, resolver: Arc<dyn CodeResolver>) {
		let name = name.into();
		tracing::info!(%name, resolver = %resolver.describe(), "host.registry.deployed");
		self.resolvers.write().insert(name, resolver);
	}

	pub fn deployed_resolver(&self, name: &str) -> Option<Arc<dyn CodeResolver>> {
		self.resolvers.read().get(name).cloned()
	}

	/// Wraps and registers an already built service without starting it.
	pub async fn load_service(&self, service: Box<dyn Service>) -> Result<Arc<ManagedServer>, HostError> {
		self.register(service, LOCAL_ORIGIN).await
	}

	/// Resolves `name` through its deployed resolver, instantiates it and
	/// registers the result without starting it.
	pub async fn load_service_by_name(&self, name: &str) -> Result<Arc<ManagedServer>, HostError> {
		let (service, origin) = self.resolve(name).await?;
		self.register(service, origin).await
	}

	/// Registers, configures and starts `service`.
	///
	/// A service that fails to start is unregistered and released again; the
	/// recorded failure is returned.
	pub async fn add_service(&self, service: Box<dyn Service>, config: ConfigProperties) -> Result<Arc<ManagedServer>, HostError> {
		let server = self.load_service(service).await?;
		self.start_registered(server, config).await
	}

	/// Name-resolving form of [`Self::add_service`].
	pub async fn add_service_by_name(&self, name: &str, config: ConfigProperties) -> Result<Arc<ManagedServer>, HostError> {
		let (service, origin) = self.resolve(name).await?;
		let server = self.register(service, origin).await?;
		self.start_registered(server, config).await
	}

	/// Builds `name` straight from its factory with an empty blob, skipping
	/// resolution, then adds it like [`Self::add_service`].
	pub async fn add_local_service(&self, name: &str, config: ConfigProperties) -> Result<Arc<ManagedServer>, HostError> {
		let service = self
			.factories
			.instantiate(name, &Bytes::new())
			.map_err(|err| HostError::resolution(name, err))?;
		let server = self.register(service, FACTORY_ORIGIN).await?;
		self.start_registered(server, config).await
	}

	/// Stops (when needed) and unregisters `id`. Unknown ids are ignored.
	///
	/// Removal happens whatever the stop outcome. Returns whether `id` was
	/// registered.
	pub async fn remove_service(&self, id: &str) -> bool {
		let Some(server) = self.get_service(id) else {
			return false;
		};
		match server.state().await {
			Some(ServiceState::Stopped | ServiceState::Paused) => {}
			_ => {
				if !server.stop().await {
					let cause = server.last_error().map(|err| err.to_string()).unwrap_or_default();
					self.error(format_args!("stop of {id} failed during removal: {cause}"));
				}
			}
		}
		self.servers.write().shift_remove(id);
		tracing::info!(id, "host.registry.removed");
		true
	}

	/// Unregisters `id` and drops its service without a graceful stop.
	pub fn kill_service(&self, id: &str) -> bool {
		let Some(server) = self.servers.write().shift_remove(id) else {
			return false;
		};
		server.kill();
		tracing::info!(id, "host.registry.killed");
		true
	}

	/// Registered instance ids in registration order.
	pub fn get_services(&self) -> Vec<String> {
		self.servers.read().keys().cloned().collect()
	}

	pub fn get_service(&self, id: &str) -> Option<Arc<ManagedServer>> {
		self.servers.read().get(id).cloned()
	}

	pub fn len(&self) -> usize {
		self.servers.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.servers.read().is_empty()
	}

	/// Human-readable listing of the registered ids.
	pub fn directory_listing(&self) -> String {
		let mut out = String::from("{\n");
		for id in self.servers.read().keys() {
			out.push_str("   ");
			out.push_str(id);
			out.push('\n');
		}
		out.push('}');
		out
	}

	/// Removes every registered service in turn, continuing past failures.
	pub async fn shutdown(&self) {
		let ids = self.get_services();
		tracing::info!(count = ids.len(), "host.registry.shutdown");
		for id in ids {
			self.remove_service(&id).await;
		}
	}

	/// Operator-facing log line.
	pub fn log(&self, message: impl Display) {
		tracing::info!(target: "svchost", "{message}");
	}

	/// Operator-facing error line.
	pub fn error(&self, error: impl Display) {
		tracing::error!(target: "svchost", "{error}");
	}

	async fn resolve(&self, name: &str) -> Result<(Box<dyn Service>, String), HostError> {
		let resolver = self
			.deployed_resolver(name)
			.ok_or_else(|| HostError::resolution(name, "no resolver deployed"))?;
		let code = resolver
			.find_code(name)
			.await
			.ok_or_else(|| HostError::resolution(name, format!("{} has no code for it", resolver.describe())))?;
		let service = self.factories.instantiate(name, &code).map_err(|err| HostError::resolution(name, err))?;
		Ok((service, resolver.describe()))
	}

	async fn register(&self, service: Box<dyn Service>, origin: impl Into<String>) -> Result<Arc<ManagedServer>, HostError> {
		let server = Arc::new(ManagedServer::wrap(service, origin, self.executor.clone()).await?);
		match self.servers.write().entry(server.id().to_string()) {
			Entry::Occupied(entry) => {
				server.kill();
				return Err(HostError::DuplicateInstance(entry.key().clone()));
			}
			Entry::Vacant(entry) => {
				entry.insert(Arc::clone(&server));
			}
		}
		tracing::info!(id = %server.id(), "host.registry.loaded");
		Ok(server)
	}

	async fn start_registered(&self, server: Arc<ManagedServer>, config: ConfigProperties) -> Result<Arc<ManagedServer>, HostError> {
		server.set_config_info(config);
		if server.start().await {
			return Ok(server);
		}
		let err = server.last_error().unwrap_or(HostError::Execution {
			operation: "start",
			message: "start reported failure".to_string(),
		});
		self.servers.write().shift_remove(server.id());
		server.kill();
		self.error(format_args!("adding {} failed and was rolled back: {err}", server.id()));
		Err(err)
	}
}

impl std::fmt::Debug for ServiceRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServiceRegistry").field("servers", &self.get_services()).finish()
	}
}

/// One-time installation slot for the process registry.
pub struct RegistrySlot {
	slot: OnceLock<Arc<ServiceRegistry>>,
}

impl Default for RegistrySlot {
	fn default() -> Self {
		Self::new()
	}
}

impl RegistrySlot {
	pub const fn new() -> Self {
		Self { slot: OnceLock::new() }
	}

	/// Installs `registry`. A second install is rejected and the first one
	/// stays authoritative.
	pub fn install(&self, registry: Arc<ServiceRegistry>) -> Result<Arc<ServiceRegistry>, HostError> {
		self.slot.set(Arc::clone(&registry)).map_err(|_| HostError::SingletonViolation)?;
		Ok(registry)
	}

	pub fn get(&self) -> Option<Arc<ServiceRegistry>> {
		self.slot.get().cloned()
	}
}

static GLOBAL: RegistrySlot = RegistrySlot::new();

/// Installs the process-wide registry.
pub fn install_global(registry: Arc<ServiceRegistry>) -> Result<Arc<ServiceRegistry>, HostError> {
	GLOBAL.install(registry)
}

/// The process-wide registry, once installed.
pub fn global() -> Option<Arc<ServiceRegistry>> {
	GLOBAL.get()
}

#[cfg(test)]
mod tests;
