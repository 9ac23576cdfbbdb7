use std::time::Duration;

use svchost_worker::BoundedCallError;
use thiserror::Error;

use crate::ServiceState;

/// Rejections raised by the lifecycle state machine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
	#[error("run loop is still alive; start rejected")]
	AlreadyRunning,
	#[error("cannot {operation} while {state}")]
	InvalidTransition { operation: &'static str, state: ServiceState },
	#[error("run loop did not stop within {grace:?}")]
	StopTimedOut { grace: Duration },
}

/// Failure reported by a hosted service from one lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
	#[error(transparent)]
	Lifecycle(#[from] LifecycleError),
	#[error("{0}")]
	Failed(String),
}

impl ServiceError {
	pub fn failed(message: impl Into<String>) -> Self {
		Self::Failed(message.into())
	}
}

/// Host-level failure taxonomy.
///
/// Only [`HostError::SingletonViolation`] is meant to end the process; the
/// rest are recorded as a server's last error and reported through the
/// registry's log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
	#[error("cannot resolve '{name}': {reason}")]
	Resolution { name: String, reason: String },
	#[error("{operation} did not complete within {deadline:?}")]
	Timeout { operation: &'static str, deadline: Duration },
	#[error("{operation} failed: {message}")]
	Execution { operation: &'static str, message: String },
	#[error("{operation} rejected: {message}")]
	StateConflict { operation: &'static str, message: String },
	#[error("only one service registry may be installed per process")]
	SingletonViolation,
	#[error("instance id '{0}' is already registered")]
	DuplicateInstance(String),
	#[error("{operation} on a killed server")]
	Killed { operation: &'static str },
}

impl HostError {
	pub(crate) fn resolution(name: &str, reason: impl ToString) -> Self {
		Self::Resolution {
			name: name.to_string(),
			reason: reason.to_string(),
		}
	}

	/// Classifies a service's own failure from `operation`.
	pub(crate) fn from_service(operation: &'static str, err: ServiceError) -> Self {
		match err {
			ServiceError::Lifecycle(err @ (LifecycleError::AlreadyRunning | LifecycleError::InvalidTransition { .. })) => Self::StateConflict {
				operation,
				message: err.to_string(),
			},
			other => Self::Execution {
				operation,
				message: other.to_string(),
			},
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}

	pub fn is_state_conflict(&self) -> bool {
		matches!(self, Self::StateConflict { .. })
	}
}

impl From<BoundedCallError> for HostError {
	fn from(err: BoundedCallError) -> Self {
		match err {
			BoundedCallError::TimedOut { operation, deadline } => Self::Timeout { operation, deadline },
			BoundedCallError::Panicked { operation, message } => Self::Execution {
				operation,
				message: format!("panicked: {message}"),
			},
			BoundedCallError::Cancelled { operation } => Self::Execution {
				operation,
				message: "cancelled by the runtime".to_string(),
			},
		}
	}
}
