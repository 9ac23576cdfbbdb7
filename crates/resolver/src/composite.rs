use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use url::Url;

use crate::CodeResolver;

/// Ordered chain of resolvers; the first member with an answer wins.
///
/// Results are never merged. Empty blobs count as "not found" so a member
/// holding a placeholder entry cannot shadow the rest of the chain.
#[derive(Default)]
pub struct CompositeResolver {
	members: RwLock<Vec<Arc<dyn CodeResolver>>>,
}

impl CompositeResolver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_members(members: impl IntoIterator<Item = Arc<dyn CodeResolver>>) -> Self {
		Self {
			members: RwLock::new(members.into_iter().collect()),
		}
	}

	/// Appends a member at the end of the chain.
	pub fn push(&self, member: Arc<dyn CodeResolver>) {
		self.members.write().push(member);
	}

	/// Removes `member` (by identity). Returns whether it was present.
	pub fn remove(&self, member: &Arc<dyn CodeResolver>) -> bool {
		let mut members = self.members.write();
		let before = members.len();
		members.retain(|m| !Arc::ptr_eq(m, member));
		members.len() != before
	}

	pub fn len(&self) -> usize {
		self.members.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.members.read().is_empty()
	}

	fn snapshot(&self) -> Vec<Arc<dyn CodeResolver>> {
		self.members.read().clone()
	}
}

#[async_trait]
impl CodeResolver for CompositeResolver {
	async fn find_code(&self, name: &str) -> Option<Bytes> {
		for member in self.snapshot() {
			if let Some(code) = member.find_code(name).await
				&& !code.is_empty()
			{
				tracing::trace!(name, member = %member.describe(), "resolver.composite.hit");
				return Some(code);
			}
		}
		None
	}

	async fn find_resource(&self, name: &str) -> Option<Url> {
		for member in self.snapshot() {
			if let Some(url) = member.find_resource(name).await {
				return Some(url);
			}
		}
		None
	}

	async fn find_library_path(&self, name: &str) -> Option<PathBuf> {
		for member in self.snapshot() {
			if let Some(path) = member.find_library_path(name).await {
				return Some(path);
			}
		}
		None
	}

	fn describe(&self) -> String {
		let inner: Vec<String> = self.snapshot().iter().map(|m| m.describe()).collect();
		format!("composite[{}]", inner.join(", "))
	}
}

impl std::fmt::Debug for CompositeResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.describe())
	}
}

/// Re-exposes one optional resolver through the capability.
///
/// Lets a single strategy sit inside a chain (or a chain inside another
/// chain). An adapter without a delegate never finds anything.
#[derive(Default, Clone)]
pub struct ChainAdapterResolver {
	delegate: Option<Arc<dyn CodeResolver>>,
}

impl ChainAdapterResolver {
	pub fn new(delegate: Option<Arc<dyn CodeResolver>>) -> Self {
		Self { delegate }
	}

	pub fn wrap(delegate: Arc<dyn CodeResolver>) -> Self {
		Self { delegate: Some(delegate) }
	}

	pub fn is_set(&self) -> bool {
		self.delegate.is_some()
	}
}

#[async_trait]
impl CodeResolver for ChainAdapterResolver {
	async fn find_code(&self, name: &str) -> Option<Bytes> {
		self.delegate.as_ref()?.find_code(name).await
	}

	async fn find_resource(&self, name: &str) -> Option<Url> {
		self.delegate.as_ref()?.find_resource(name).await
	}

	async fn find_library_path(&self, name: &str) -> Option<PathBuf> {
		self.delegate.as_ref()?.find_library_path(name).await
	}

	fn describe(&self) -> String {
		match &self.delegate {
			Some(delegate) => format!("adapter({})", delegate.describe()),
			None => "adapter(unset)".to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::InMemoryResolver;

	fn memory(entries: &[(&str, &'static [u8])]) -> Arc<dyn CodeResolver> {
		let resolver = InMemoryResolver::new();
		for (name, code) in entries {
			resolver.deploy(*name, *code);
		}
		Arc::new(resolver)
	}

	#[tokio::test]
	async fn first_member_in_declared_order_wins() {
		let chain = CompositeResolver::from_members([
			memory(&[("A", &b"first-a"[..])]),
			memory(&[("A", &b"second-a"[..]), ("B", &b"second-b"[..])]),
		]);

		assert_eq!(chain.find_code("A").await.as_deref(), Some(&b"first-a"[..]));
		assert_eq!(chain.find_code("B").await.as_deref(), Some(&b"second-b"[..]));
		assert!(chain.find_code("C").await.is_none());
	}

	#[tokio::test]
	async fn empty_chain_finds_nothing() {
		let chain = CompositeResolver::new();
		for name in ["A", "", "billing.Ledger"] {
			assert!(chain.find_code(name).await.is_none());
			assert!(chain.find_resource(name).await.is_none());
			assert!(chain.find_library_path(name).await.is_none());
		}
	}

	#[tokio::test]
	async fn empty_blob_does_not_shadow_later_members() {
		let chain = CompositeResolver::from_members([memory(&[("A", &b""[..])]), memory(&[("A", &b"real"[..])])]);
		assert_eq!(chain.find_code("A").await.as_deref(), Some(&b"real"[..]));
	}

	#[tokio::test]
	async fn members_can_be_added_and_removed() {
		let chain = CompositeResolver::new();
		let first = memory(&[("A", &b"one"[..])]);
		let second = memory(&[("A", &b"two"[..])]);
		chain.push(Arc::clone(&first));
		chain.push(Arc::clone(&second));
		assert_eq!(chain.len(), 2);

		assert!(chain.remove(&first));
		assert!(!chain.remove(&first));
		assert_eq!(chain.find_code("A").await.as_deref(), Some(&b"two"[..]));
	}

	#[tokio::test]
	async fn adapters_nest_inside_chains() {
		let unset = ChainAdapterResolver::default();
		assert!(unset.find_code("A").await.is_none());
		assert_eq!(unset.describe(), "adapter(unset)");

		let inner = Arc::new(CompositeResolver::from_members([memory(&[("A", &b"nested"[..])])]));
		let outer = CompositeResolver::from_members([
			Arc::new(unset) as Arc<dyn CodeResolver>,
			Arc::new(ChainAdapterResolver::wrap(inner)),
		]);
		assert_eq!(outer.find_code("A").await.as_deref(), Some(&b"nested"[..]));
	}
}
