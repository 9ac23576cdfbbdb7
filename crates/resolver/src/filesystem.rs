use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::CodeResolver;

/// Fixed extension of code files under a [`FileSystemResolver`] root.
pub const CODE_EXTENSION: &str = "svc";

/// Resolver reading code files below a root directory.
///
/// A dotted name maps to a nested path: `billing.Ledger` resolves to
/// `<root>/billing/Ledger.svc`. Lookups never leave the root: names with
/// empty segments, parent or absolute components are not found.
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
	root: PathBuf,
}

impl FileSystemResolver {
	/// Creates a resolver rooted at `root`, which must be an existing directory.
	pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
		let root = root.into();
		if !root.is_dir() {
			return Err(io::Error::new(io::ErrorKind::NotFound, format!("{} is not a directory", root.display())));
		}
		Ok(Self { root })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Path a dotted `name` maps to, whether or not it exists.
	///
	/// `None` when any segment is empty or is not a plain file name.
	pub fn code_path(&self, name: &str) -> Option<PathBuf> {
		let mut segments = name.split('.').peekable();
		let mut path = self.root.clone();
		while let Some(segment) = segments.next() {
			let segment = plain_segment(segment)?;
			if segments.peek().is_some() {
				path.push(segment);
			} else {
				path.push(format!("{segment}.{CODE_EXTENSION}"));
			}
		}
		Some(path)
	}

	/// Joins a root-relative `name`, refusing anything that would leave the root.
	fn contained(&self, name: &str) -> Option<PathBuf> {
		let relative = Path::new(name);
		let mut components = relative.components().peekable();
		components.peek()?;
		components
			.all(|component| matches!(component, Component::Normal(_)))
			.then(|| self.root.join(relative))
	}
}

fn plain_segment(segment: &str) -> Option<&str> {
	let mut components = Path::new(segment).components();
	match (components.next(), components.next()) {
		(Some(Component::Normal(part)), None) if part == segment => Some(segment),
		_ => None,
	}
}

#[async_trait]
impl CodeResolver for FileSystemResolver {
	async fn find_code(&self, name: &str) -> Option<Bytes> {
		let Some(path) = self.code_path(name) else {
			tracing::debug!(name, "resolver.fs.rejected_name");
			return None;
		};
		match tokio::fs::read(&path).await {
			Ok(code) => Some(Bytes::from(code)),
			Err(err) => {
				tracing::trace!(path = %path.display(), error = %err, "resolver.fs.miss");
				None
			}
		}
	}

	async fn find_resource(&self, name: &str) -> Option<Url> {
		let path = self.contained(name)?;
		if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
			return None;
		}
		let path = tokio::fs::canonicalize(&path).await.ok()?;
		Url::from_file_path(path).ok()
	}

	async fn find_library_path(&self, name: &str) -> Option<PathBuf> {
		let file = format!("{}{name}{}", std::env::consts::DLL_PREFIX, std::env::consts::DLL_SUFFIX);
		let path = self.contained(&file)?;
		tokio::fs::try_exists(&path).await.unwrap_or(false).then_some(path)
	}

	fn describe(&self) -> String {
		format!("fs:{}", self.root.display())
	}
}
