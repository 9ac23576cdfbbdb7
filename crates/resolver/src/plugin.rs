//! Eager plugin preloading.
//!
//! A plugin directory holds archives: files with the [`ARCHIVE_EXTENSION`]
//! extension containing a TOML manifest. The `plugin-class` attribute names
//! the one designated class of the archive. A reload scans the directory,
//! builds a fresh [`PluginLoader`] scoped to the archives it found, and
//! instantiates every designated class exactly once so construction side
//! effects (typically registering with a host) happen up front.
//!
//! Every instance keeps its loader alive. Reloading drops only the
//! resolver's handle: the old loader is freed once the last instance built
//! under it goes away, and instances from different reloads never compare
//! as the same loader.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use svchost_worker::spawn_blocking;
use thiserror::Error;

use crate::{CodeResolver, FactoryTable, InstantiateError};

/// File extension identifying plugin archives.
pub const ARCHIVE_EXTENSION: &str = "plugin";

static NEXT_LOADER: AtomicU64 = AtomicU64::new(1);

/// Identity of one loader generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(u64);

impl LoaderId {
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl std::fmt::Display for LoaderId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "loader#{}", self.0)
	}
}

#[derive(Debug, Deserialize)]
struct PluginManifest {
	#[serde(rename = "plugin-class")]
	plugin_class: Option<String>,
}

/// One discovered archive and the class it designates.
#[derive(Debug, Clone)]
pub struct PluginArchive {
	pub path: PathBuf,
	pub class: String,
	pub code: Bytes,
}

/// Failure while preloading one designated class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreloadError {
	#[error("plugin class '{class}' from {}: {source}", archive.display())]
	Instantiate {
		class: String,
		archive: PathBuf,
		#[source]
		source: InstantiateError,
	},
}

/// Receives the outcome of every designated class during a reload.
pub trait PreloadListener {
	fn plugin_loaded(&self, class: &str);
	fn plugin_failed(&self, error: &PreloadError);
}

impl PreloadListener for () {
	fn plugin_loaded(&self, _class: &str) {}
	fn plugin_failed(&self, _error: &PreloadError) {}
}

impl<L, E> PreloadListener for (L, E)
where
	L: Fn(&str),
	E: Fn(&PreloadError),
{
	fn plugin_loaded(&self, class: &str) {
		(self.0)(class)
	}

	fn plugin_failed(&self, error: &PreloadError) {
		(self.1)(error)
	}
}

/// Loader generation scoped to the archives found by one reload.
#[derive(Debug)]
pub struct PluginLoader {
	id: LoaderId,
	dir: PathBuf,
	archives: Vec<PluginArchive>,
}

impl PluginLoader {
	pub fn id(&self) -> LoaderId {
		self.id
	}

	pub fn archives(&self) -> &[PluginArchive] {
		&self.archives
	}

	fn archive_for(&self, class: &str) -> Option<&PluginArchive> {
		self.archives.iter().find(|a| a.class == class)
	}
}

#[async_trait]
impl CodeResolver for PluginLoader {
	async fn find_code(&self, name: &str) -> Option<Bytes> {
		self.archive_for(name).map(|a| a.code.clone())
	}

	fn describe(&self) -> String {
		format!("plugins:{}@{}", self.dir.display(), self.id)
	}
}

/// Object built from a designated plugin class.
#[derive(Debug)]
pub struct PluginInstance<T> {
	class: String,
	loader: Arc<PluginLoader>,
	value: T,
}

impl<T> PluginInstance<T> {
	pub fn class(&self) -> &str {
		&self.class
	}

	pub fn loader(&self) -> LoaderId {
		self.loader.id
	}

	/// Whether both instances were built by the same reload.
	pub fn same_loader<U>(&self, other: &PluginInstance<U>) -> bool {
		Arc::ptr_eq(&self.loader, &other.loader)
	}

	pub fn value(&self) -> &T {
		&self.value
	}

	pub fn into_value(self) -> T {
		self.value
	}
}

/// Eager resolver that preloads every designated class of a plugin directory.
pub struct PluginPreloadResolver<T> {
	dir: PathBuf,
	factories: Arc<FactoryTable<T>>,
	loader: RwLock<Option<Arc<PluginLoader>>>,
}

impl<T> PluginPreloadResolver<T> {
	/// Creates a resolver for `dir` without loading anything yet.
	pub fn new(dir: impl Into<PathBuf>, factories: Arc<FactoryTable<T>>) -> Self {
		Self {
			dir: dir.into(),
			factories,
			loader: RwLock::new(None),
		}
	}

	/// Creates a resolver and performs the first reload.
	pub async fn open(dir: impl Into<PathBuf>, factories: Arc<FactoryTable<T>>, listener: &impl PreloadListener) -> (Self, Vec<PluginInstance<T>>) {
		let resolver = Self::new(dir, factories);
		let instances = resolver.reload(listener).await;
		(resolver, instances)
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Current loader, if a reload has happened since the last unload.
	pub fn loader(&self) -> Option<Arc<PluginLoader>> {
		self.loader.read().clone()
	}

	/// Rescans the directory, replaces the loader and instantiates every
	/// designated class once. The scan runs on the blocking pool.
	pub async fn reload(&self, listener: &impl PreloadListener) -> Vec<PluginInstance<T>> {
		let dir = self.dir.clone();
		let archives = match spawn_blocking(move || scan_archives(&dir)).await {
			Ok(archives) => archives,
			Err(err) => {
				tracing::warn!(dir = %self.dir.display(), error = %err, "resolver.plugin.scan_failed");
				Vec::new()
			}
		};
		let loader = Arc::new(PluginLoader {
			id: LoaderId(NEXT_LOADER.fetch_add(1, Ordering::Relaxed)),
			dir: self.dir.clone(),
			archives,
		});
		if let Some(previous) = self.loader.write().replace(Arc::clone(&loader)) {
			tracing::debug!(previous = %previous.id, next = %loader.id, "resolver.plugin.replaced");
		}

		let mut instances = Vec::with_capacity(loader.archives.len());
		for archive in &loader.archives {
			match self.factories.instantiate(&archive.class, &archive.code) {
				Ok(value) => {
					tracing::info!(class = %archive.class, loader = %loader.id, "resolver.plugin.loaded");
					listener.plugin_loaded(&archive.class);
					instances.push(PluginInstance {
						class: archive.class.clone(),
						loader: Arc::clone(&loader),
						value,
					});
				}
				Err(source) => {
					let error = PreloadError::Instantiate {
						class: archive.class.clone(),
						archive: archive.path.clone(),
						source,
					};
					tracing::warn!(%error, "resolver.plugin.failed");
					listener.plugin_failed(&error);
				}
			}
		}
		instances
	}

	/// Drops the resolver's loader handle.
	pub fn unload(&self) {
		self.loader.write().take();
	}
}

#[async_trait]
impl<T: Send + Sync + 'static> CodeResolver for PluginPreloadResolver<T> {
	async fn find_code(&self, name: &str) -> Option<Bytes> {
		let loader = self.loader()?;
		loader.find_code(name).await
	}

	fn describe(&self) -> String {
		match self.loader() {
			Some(loader) => loader.describe(),
			None => format!("plugins:{}@unloaded", self.dir.display()),
		}
	}
}

/// Lists archives in `dir` that designate a class, sorted by file name.
///
/// Unreadable or malformed archives, and archives without the attribute,
/// are skipped.
fn scan_archives(dir: &Path) -> Vec<PluginArchive> {
	let Ok(entries) = std::fs::read_dir(dir) else {
		return Vec::new();
	};
	let mut paths: Vec<PathBuf> = entries
		.filter_map(Result::ok)
		.map(|entry| entry.path())
		.filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION))
		.collect();
	paths.sort();

	paths
		.into_iter()
		.filter_map(|path| {
			let raw = std::fs::read(&path).ok()?;
			let text = std::str::from_utf8(&raw).ok()?;
			let manifest: PluginManifest = match toml::from_str(text) {
				Ok(manifest) => manifest,
				Err(err) => {
					tracing::debug!(path = %path.display(), error = %err, "resolver.plugin.bad_manifest");
					return None;
				}
			};
			let class = manifest.plugin_class?.trim().to_string();
			if class.is_empty() {
				return None;
			}
			Some(PluginArchive {
				path,
				class,
				code: Bytes::from(raw),
			})
		})
		.collect()
}
