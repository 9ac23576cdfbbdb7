use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;

/// Named constructor turning a resolved blob into an object.
pub type Factory<T> = Arc<dyn Fn(&Bytes) -> Result<T, String> + Send + Sync>;

/// Failure to materialize a resolved name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstantiateError {
	#[error("no factory registered for '{0}'")]
	NotRegistered(String),
	#[error("factory for '{name}' failed: {reason}")]
	Failed { name: String, reason: String },
}

/// Table of named factories populated at startup.
///
/// This is the only way a name becomes a live object: resolution produces
/// the blob, the table entry of the same name builds the instance from it.
pub struct FactoryTable<T> {
	entries: RwLock<IndexMap<String, Factory<T>>>,
}

impl<T> Default for FactoryTable<T> {
	fn default() -> Self {
		Self {
			entries: RwLock::new(IndexMap::new()),
		}
	}
}

impl<T> FactoryTable<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `factory` under `name`, replacing any previous entry.
	pub fn register<F>(&self, name: impl Into<String>, factory: F)
	where
		F: Fn(&Bytes) -> Result<T, String> + Send + Sync + 'static,
	{
		self.entries.write().insert(name.into(), Arc::new(factory));
	}

	pub fn contains(&self, name: &str) -> bool {
		self.entries.read().contains_key(name)
	}

	/// Registered names in registration order.
	pub fn names(&self) -> Vec<String> {
		self.entries.read().keys().cloned().collect()
	}

	/// Builds a new object named `name` from `code`.
	pub fn instantiate(&self, name: &str, code: &Bytes) -> Result<T, InstantiateError> {
		let factory = self
			.entries
			.read()
			.get(name)
			.cloned()
			.ok_or_else(|| InstantiateError::NotRegistered(name.to_string()))?;
		factory(code).map_err(|reason| InstantiateError::Failed {
			name: name.to_string(),
			reason,
		})
	}
}

impl<T> std::fmt::Debug for FactoryTable<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FactoryTable").field("names", &self.names()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn instantiate_passes_blob_and_reports_failures() {
		let table: FactoryTable<usize> = FactoryTable::new();
		table.register("Len", |code| Ok(code.len()));
		table.register("Picky", |code| if code.is_empty() { Err("empty blob".into()) } else { Ok(1) });

		assert_eq!(table.instantiate("Len", &Bytes::from_static(b"abc")), Ok(3));
		assert_eq!(table.instantiate("Missing", &Bytes::new()), Err(InstantiateError::NotRegistered("Missing".into())));
		assert_eq!(
			table.instantiate("Picky", &Bytes::new()),
			Err(InstantiateError::Failed {
				name: "Picky".into(),
				reason: "empty blob".into()
			})
		);
		assert_eq!(table.names(), vec!["Len".to_string(), "Picky".to_string()]);
	}
}
