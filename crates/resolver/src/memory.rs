use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::CodeResolver;

/// Resolver backed by an explicit name to blob map.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
	entries: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryResolver {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds or replaces the blob for `name`.
	pub fn deploy(&self, name: impl Into<String>, code: impl Into<Bytes>) {
		let name = name.into();
		let code = code.into();
		tracing::debug!(name = %name, len = code.len(), "resolver.memory.deploy");
		self.entries.write().insert(name, code);
	}

	/// Builder form of [`Self::deploy`].
	#[must_use]
	pub fn with(self, name: impl Into<String>, code: impl Into<Bytes>) -> Self {
		self.deploy(name, code);
		self
	}

	pub fn remove(&self, name: &str) -> Option<Bytes> {
		self.entries.write().remove(name)
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

#[async_trait]
impl CodeResolver for InMemoryResolver {
	async fn find_code(&self, name: &str) -> Option<Bytes> {
		self.entries.read().get(name).cloned()
	}

	fn describe(&self) -> String {
		"in-memory".to_string()
	}
}
