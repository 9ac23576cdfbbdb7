use std::path::{Path, PathBuf};

use serde::Deserialize;
use svchost_resolver::{ResolverConfig, ResolverConfigError};
use thiserror::Error;

use crate::ServiceRegistry;
use crate::directive::{self, Directive};

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "ServerManager.log";

/// Host settings file.
///
/// ```toml
/// log-file = "ServerManager.log"
/// plugin-dir = "plugins"
/// directives = ["Heartbeat -interval-ms:500"]
///
/// [[deploy]]
/// service = "Echo"
/// resolver = { kind = "file-system", root = "/srv/services" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HostSettings {
	#[serde(default)]
	pub log_file: Option<PathBuf>,
	#[serde(default)]
	pub plugin_dir: Option<PathBuf>,
	#[serde(default)]
	pub directives: Vec<String>,
	#[serde(default)]
	pub deploy: Vec<Deployment>,
}

/// One resolver deployed for a service name at start-up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Deployment {
	pub service: String,
	pub resolver: ResolverConfig,
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("cannot read settings {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("invalid settings {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error("resolver for '{service}': {source}")]
	Resolver {
		service: String,
		#[source]
		source: ResolverConfigError,
	},
}

impl HostSettings {
	pub async fn load(path: &Path) -> Result<Self, SettingsError> {
		let text = tokio::fs::read_to_string(path).await.map_err(|source| SettingsError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		toml::from_str(&text).map_err(|source| SettingsError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	pub fn log_file(&self) -> &Path {
		self.log_file.as_deref().unwrap_or(Path::new(DEFAULT_LOG_FILE))
	}

	/// Configured directive lines, comments removed.
	pub fn parsed_directives(&self) -> Vec<Directive> {
		self.directives.iter().filter_map(|line| directive::parse_line(line)).collect()
	}

	/// Builds every configured resolver, then deploys them in order.
	///
	/// Nothing is deployed if any resolver fails to build.
	pub fn apply(&self, registry: &ServiceRegistry) -> Result<usize, SettingsError> {
		let built = self
			.deploy
			.iter()
			.map(|d| {
				d.resolver.build().map(|r| (d.service.as_str(), r)).map_err(|source| SettingsError::Resolver {
					service: d.service.clone(),
					source,
				})
			})
			.collect::<Result<Vec<_>, _>>()?;
		let count = built.len();
		for (service, resolver) in built {
			registry.deploy_service(service, resolver);
		}
		Ok(count)
	}
}
