use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a hosted service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceState {
	#[default]
	Stopped,
	Starting,
	Running,
	Pausing,
	Paused,
	Resuming,
	Stopping,
}

impl ServiceState {
	pub const ALL: [Self; 7] = [
		Self::Stopped,
		Self::Starting,
		Self::Running,
		Self::Pausing,
		Self::Paused,
		Self::Resuming,
		Self::Stopping,
	];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Stopped => "STOPPED",
			Self::Starting => "STARTING",
			Self::Running => "RUNNING",
			Self::Pausing => "PAUSING",
			Self::Paused => "PAUSED",
			Self::Resuming => "RESUMING",
			Self::Stopping => "STOPPING",
		}
	}

	/// Whether the cooperative state machine allows moving to `next`.
	///
	/// Staying in the same state is always allowed. Forced resets performed
	/// by a kill are outside this relation.
	pub const fn can_transition_to(self, next: Self) -> bool {
		use ServiceState::*;
		matches!(
			(self, next),
			(Stopped, Stopped)
				| (Starting, Starting)
				| (Running, Running)
				| (Pausing, Pausing)
				| (Paused, Paused)
				| (Resuming, Resuming)
				| (Stopping, Stopping)
				| (Stopped, Starting)
				| (Starting, Running)
				| (Running, Pausing)
				| (Pausing, Paused)
				| (Paused, Resuming)
				| (Resuming, Running)
				| (Stopping, Stopped)
				| (Starting | Running | Pausing | Paused | Resuming, Stopping)
		)
	}
}

impl fmt::Display for ServiceState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown service state '{0}'")]
pub struct UnknownState(pub String);

impl FromStr for ServiceState {
	type Err = UnknownState;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let wanted = s.trim();
		Self::ALL
			.into_iter()
			.find(|state| state.as_str().eq_ignore_ascii_case(wanted))
			.ok_or_else(|| UnknownState(s.to_string()))
	}
}

/// Flat string-keyed configuration handed to a service.
///
/// Keys keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigProperties(IndexMap<String, String>);

impl ConfigProperties {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}

	/// Sets `key`, returning the previous value.
	pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
		self.0.insert(key.into(), value.into())
	}

	/// Builder form of [`Self::set`].
	#[must_use]
	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.set(key, value);
		self
	}

	pub fn remove(&mut self, key: &str) -> Option<String> {
		self.0.shift_remove(key)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigProperties {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for ConfigProperties {
	fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
		self.0.extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
	}
}
