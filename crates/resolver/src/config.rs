use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::{CodeResolver, CompositeResolver, DEFAULT_NETWORK_TIMEOUT, FileSystemResolver, InMemoryResolver, NetworkResolver};

/// Declarative description of a resolver, as written in host settings.
///
/// ```toml
/// kind = "composite"
///
/// [[members]]
/// kind = "file-system"
/// root = "/srv/services"
///
/// [[members]]
/// kind = "network"
/// address = "codehost:7070"
/// timeout-secs = 5
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum ResolverConfig {
	/// Inline UTF-8 blobs keyed by service name.
	InMemory {
		#[serde(default)]
		entries: IndexMap<String, String>,
	},
	FileSystem {
		root: PathBuf,
	},
	Network {
		address: String,
		#[serde(default, rename = "timeout-secs")]
		timeout_secs: Option<u64>,
	},
	Composite {
		#[serde(default)]
		members: Vec<ResolverConfig>,
	},
}

#[derive(Debug, Error)]
pub enum ResolverConfigError {
	#[error("file-system resolver root {}: {source}", root.display())]
	InvalidRoot {
		root: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("network resolver needs a non-empty address")]
	EmptyAddress,
	#[error("network resolver timeout must be positive")]
	ZeroTimeout,
}

impl ResolverConfig {
	/// Builds the described resolver. Composite members are built in order.
	pub fn build(&self) -> Result<Arc<dyn CodeResolver>, ResolverConfigError> {
		Ok(match self {
			Self::InMemory { entries } => {
				let resolver = InMemoryResolver::new();
				for (name, code) in entries {
					resolver.deploy(name.clone(), code.clone().into_bytes());
				}
				Arc::new(resolver)
			}
			Self::FileSystem { root } => {
				let resolver = FileSystemResolver::new(root.clone()).map_err(|source| ResolverConfigError::InvalidRoot {
					root: root.clone(),
					source,
				})?;
				Arc::new(resolver)
			}
			Self::Network { address, timeout_secs } => {
				if address.trim().is_empty() {
					return Err(ResolverConfigError::EmptyAddress);
				}
				let timeout = match timeout_secs {
					Some(0) => return Err(ResolverConfigError::ZeroTimeout),
					Some(secs) => Duration::from_secs(*secs),
					None => DEFAULT_NETWORK_TIMEOUT,
				};
				Arc::new(NetworkResolver::new(address.trim()).with_timeout(timeout))
			}
			Self::Composite { members } => {
				let built = members.iter().map(Self::build).collect::<Result<Vec<_>, _>>()?;
				Arc::new(CompositeResolver::from_members(built))
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn builds_nested_composite_from_toml() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("Echo.svc"), "from-disk").unwrap();
		let text = format!(
			r#"
kind = "composite"

[[members]]
kind = "in-memory"
entries = {{ Echo = "from-memory", Probe = "probe" }}

[[members]]
kind = "file-system"
root = {root:?}

[[members]]
kind = "network"
address = "127.0.0.1:9"
timeout-secs = 1
"#,
			root = dir.path().display().to_string()
		);
		let config: ResolverConfig = toml::from_str(&text).unwrap();
		let ResolverConfig::Composite { members } = &config else {
			panic!("expected composite, got {config:?}");
		};
		assert_eq!(members.len(), 3);

		let resolver = config.build().unwrap();
		assert_eq!(resolver.find_code("Echo").await.as_deref(), Some(&b"from-memory"[..]));
		assert_eq!(resolver.find_code("Probe").await.as_deref(), Some(&b"probe"[..]));
		assert!(resolver.describe().starts_with("composite[in-memory, fs:"));
	}

	#[test]
	fn rejects_invalid_descriptions() {
		let missing = ResolverConfig::FileSystem {
			root: PathBuf::from("/definitely/not/a/dir"),
		};
		assert!(matches!(missing.build(), Err(ResolverConfigError::InvalidRoot { .. })));

		let zero: ResolverConfig = toml::from_str("kind = \"network\"\naddress = \"h:1\"\ntimeout-secs = 0\n").unwrap();
		assert!(matches!(zero.build(), Err(ResolverConfigError::ZeroTimeout)));

		let blank = ResolverConfig::Network {
			address: "  ".into(),
			timeout_secs: None,
		};
		assert!(matches!(blank.build(), Err(ResolverConfigError::EmptyAddress)));

		assert!(toml::from_str::<ResolverConfig>("kind = \"carrier-pigeon\"\n").is_err());
	}
}
