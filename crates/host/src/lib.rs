//! In-process service container.
//!
//! Services implement [`Service`] (usually through [`ThreadedService`] and a
//! [`RunLoop`]). The [`ServiceRegistry`] resolves them by name, wraps each in
//! a [`ManagedServer`] whose control calls are deadline bounded, and keeps
//! them in an ordered directory until they are removed or killed.

pub mod bootstrap;
pub mod builtin;
pub mod directive;
mod error;
mod lifecycle;
mod registry;
mod server;
mod service;
pub mod settings;
mod state;

pub use directive::Directive;
pub use error::{HostError, LifecycleError, ServiceError};
pub use lifecycle::{DEFAULT_VERSION, Lifecycle, RunContext, RunLoop, STOP_GRACE, ThreadedService, Transition};
pub use svchost_worker::TaskExit;
pub use registry::{FACTORY_ORIGIN, LOCAL_ORIGIN, RegistrySlot, ServiceFactories, ServiceRegistry, global, install_global};
pub use server::{CALL_DEADLINE, ManagedServer};
pub use service::Service;
pub use settings::{HostSettings, SettingsError};
pub use state::{ConfigProperties, ServiceState, UnknownState};
