use async_trait::async_trait;
use bytes::Bytes;

use crate::CodeResolver;

/// Narrow contract of the relational driver a [`RelationalResolver`] fronts.
///
/// Implementations run `sql` and return the first column of the first row,
/// or `None` when the result set is empty.
#[async_trait]
pub trait BlobQuery: Send + Sync + 'static {
	type Error: std::error::Error + Send + Sync + 'static;

	async fn first_blob(&self, sql: &str) -> Result<Option<Bytes>, Self::Error>;
}

/// Resolver issuing one templated query per lookup.
///
/// The template carries a single `?` placeholder that is replaced verbatim
/// by the requested name, e.g. `SELECT code FROM services WHERE name = '?'`.
#[derive(Debug)]
pub struct RelationalResolver<Q> {
	driver: Q,
	template: String,
}

impl<Q: BlobQuery> RelationalResolver<Q> {
	pub fn new(driver: Q, template: impl Into<String>) -> Self {
		Self {
			driver,
			template: template.into(),
		}
	}

	/// Renders the query for `name`, or `None` if the template has no placeholder.
	pub fn render(&self, name: &str) -> Option<String> {
		let (pre, post) = self.template.split_once('?')?;
		Some(format!("{pre}{name}{post}"))
	}
}

#[async_trait]
impl<Q: BlobQuery> CodeResolver for RelationalResolver<Q> {
	async fn find_code(&self, name: &str) -> Option<Bytes> {
		let Some(sql) = self.render(name) else {
			tracing::warn!(template = %self.template, "resolver.sql.no_placeholder");
			return None;
		};
		match self.driver.first_blob(&sql).await {
			Ok(blob) => blob,
			Err(err) => {
				tracing::warn!(%sql, error = %err, "resolver.sql.query_failed");
				None
			}
		}
	}

	fn describe(&self) -> String {
		"sql".to_string()
	}
}
