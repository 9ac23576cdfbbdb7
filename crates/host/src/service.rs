use async_trait::async_trait;

use crate::{ConfigProperties, ServiceError, ServiceState};

/// Contract every hosted service implements.
///
/// Control calls are invoked by a [`ManagedServer`](crate::ManagedServer)
/// on their own bounded tasks, so an implementation may block or hang
/// without stalling its caller past the call deadline.
#[async_trait]
pub trait Service: Send + Sync + 'static {
	/// Short type label, the first part of the instance id.
	fn type_name(&self) -> &str;

	async fn start(&self) -> Result<(), ServiceError>;

	async fn stop(&self) -> Result<(), ServiceError>;

	async fn pause(&self) -> Result<(), ServiceError>;

	async fn resume(&self) -> Result<(), ServiceError>;

	fn state(&self) -> ServiceState;

	fn instance_id(&self) -> String;

	fn config_info(&self) -> ConfigProperties;

	fn set_config_info(&self, config: ConfigProperties);

	/// Forced teardown run when the owning server is killed.
	fn kill(&self) {}
}
