use std::path::Path;
use std::sync::Arc;

use svchost_host::{ConfigProperties, Service, ServiceRegistry};
use svchost_resolver::{CodeResolver, PluginPreloadResolver, PreloadError};

pub type ServicePlugins = PluginPreloadResolver<Box<dyn Service>>;

/// Preloads every designated class in `dir` and adds each as a started
/// service.
///
/// The plugin loader is deployed for every designated class, so the same
/// names can later be added again by resolution.
pub async fn preload(registry: &ServiceRegistry, dir: &Path) -> Arc<ServicePlugins> {
	let listener = (
		|class: &str| registry.log(format_args!("plugin {class} loaded")),
		|err: &PreloadError| registry.error(err),
	);
	let (plugins, instances) = PluginPreloadResolver::open(dir, Arc::clone(registry.factories()), &listener).await;
	let plugins = Arc::new(plugins);

	for instance in instances {
		let class = instance.class().to_string();
		registry.deploy_service(class.clone(), Arc::clone(&plugins) as Arc<dyn CodeResolver>);
		if let Err(err) = registry.add_service(instance.into_value(), ConfigProperties::new()).await {
			registry.error(format_args!("plugin {class} did not start: {err}"));
		}
	}
	plugins
}

#[cfg(test)]
mod tests {
	use svchost_host::builtin;

	use super::*;

	#[tokio::test(start_paused = true)]
	async fn designated_classes_become_running_services() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("pulse.plugin"), "plugin-class = \"Heartbeat\"\n").unwrap();
		std::fs::write(dir.path().join("unknown.plugin"), "plugin-class = \"Nope\"\n").unwrap();
		std::fs::write(dir.path().join("notes.plugin"), "title = \"no class\"\n").unwrap();

		let registry = ServiceRegistry::new();
		builtin::register_builtins(&registry);
		let plugins = preload(&registry, dir.path()).await;

		assert_eq!(registry.len(), 1);
		assert!(registry.get_services()[0].starts_with("Heartbeat:1.0:"));
		assert!(registry.deployed_resolver("Heartbeat").is_some());
		assert!(registry.deployed_resolver("Nope").is_none());
		assert!(plugins.find_code("Heartbeat").await.is_some());

		let again = registry.add_service_by_name("Heartbeat", ConfigProperties::new()).await.unwrap();
		assert!(again.id().ends_with(&plugins.describe()));
		registry.shutdown().await;
	}
}
