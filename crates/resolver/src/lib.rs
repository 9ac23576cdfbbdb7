//! Code resolution chain.
//!
//! A [`CodeResolver`] turns a service name into a raw code blob. Resolvers
//! are independent strategies (in memory, filesystem, relational query,
//! network fetch) that compose into ordered first-match-wins chains through
//! [`CompositeResolver`]. Turning a blob into a live object is a separate
//! step handled by a [`FactoryTable`] of named constructors.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
pub use bytes::Bytes;
pub use url::Url;

mod composite;
mod config;
mod factory;
mod filesystem;
mod memory;
mod network;
mod plugin;
mod relational;

pub use composite::{ChainAdapterResolver, CompositeResolver};
pub use config::{ResolverConfig, ResolverConfigError};
pub use factory::{Factory, FactoryTable, InstantiateError};
pub use filesystem::{CODE_EXTENSION, FileSystemResolver};
pub use memory::InMemoryResolver;
pub use network::{DEFAULT_NETWORK_TIMEOUT, MAX_CODE_LEN, NetworkResolver, serve_code};
pub use plugin::{
	ARCHIVE_EXTENSION, LoaderId, PluginArchive, PluginInstance, PluginLoader, PluginPreloadResolver, PreloadError, PreloadListener,
};
pub use relational::{BlobQuery, RelationalResolver};

/// Capability shared by every code resolution strategy.
///
/// Every lookup answers "not found" with `None`; failures inside a strategy
/// are logged and degrade to `None` so a chain can move on to the next
/// member.
#[async_trait]
pub trait CodeResolver: Send + Sync + 'static {
	/// Returns the raw code blob for `name`.
	async fn find_code(&self, name: &str) -> Option<Bytes>;

	/// Returns a URL for a named resource.
	async fn find_resource(&self, _name: &str) -> Option<Url> {
		None
	}

	/// Returns the path of a native library.
	async fn find_library_path(&self, _name: &str) -> Option<PathBuf> {
		None
	}

	/// Short human-readable label used in logs and instance ids.
	fn describe(&self) -> String;
}

#[async_trait]
impl<R> CodeResolver for Arc<R>
where
	R: CodeResolver + ?Sized,
{
	async fn find_code(&self, name: &str) -> Option<Bytes> {
		(**self).find_code(name).await
	}

	async fn find_resource(&self, name: &str) -> Option<Url> {
		(**self).find_resource(name).await
	}

	async fn find_library_path(&self, name: &str) -> Option<PathBuf> {
		(**self).find_library_path(name).await
	}

	fn describe(&self) -> String {
		(**self).describe()
	}
}
