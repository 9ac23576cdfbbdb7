//! Start-up argument handling.
//!
//! `@path` loads a directive script, `TEST` runs the self-test, anything
//! else is a single directive line.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::directive::{self, Directive};
use crate::{HostError, ManagedServer, ServiceRegistry, builtin};

/// Token that triggers the self-test.
pub const SELF_TEST_ARG: &str = "TEST";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootArg {
	Script(PathBuf),
	SelfTest,
	Directive(Directive),
}

/// Classifies one start-up argument. Blank arguments yield `None`.
pub fn parse_arg(arg: &str) -> Option<BootArg> {
	let arg = arg.trim();
	if let Some(path) = arg.strip_prefix('@') {
		return Some(BootArg::Script(PathBuf::from(path)));
	}
	if arg == SELF_TEST_ARG {
		return Some(BootArg::SelfTest);
	}
	directive::parse_line(arg).map(BootArg::Directive)
}

#[derive(Debug, Error)]
pub enum BootError {
	#[error("cannot read directive script {}: {source}", path.display())]
	Script {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("cannot add '{service}': {source}")]
	Service {
		service: String,
		#[source]
		source: HostError,
	},
}

/// Outcome of a bootstrap run.
#[derive(Debug, Default)]
pub struct BootReport {
	/// Instance ids added, in order.
	pub added: Vec<String>,
	pub failures: Vec<BootError>,
}

impl BootReport {
	pub fn is_clean(&self) -> bool {
		self.failures.is_empty()
	}

	fn record(&mut self, registry: &ServiceRegistry, service: &str, outcome: Result<Arc<ManagedServer>, HostError>) {
		match outcome {
			Ok(server) => self.added.push(server.id().to_string()),
			Err(source) => {
				let err = BootError::Service {
					service: service.to_string(),
					source,
				};
				registry.error(&err);
				self.failures.push(err);
			}
		}
	}
}

/// Adds the service a directive names, with its options as configuration.
///
/// Names with a deployed resolver go through resolution; other names are
/// built straight from their factory.
pub async fn apply_directive(registry: &ServiceRegistry, directive: &Directive) -> Result<Arc<ManagedServer>, HostError> {
	registry.log(format_args!("adding {} with {} option(s)", directive.service, directive.options.len()));
	if registry.deployed_resolver(&directive.service).is_some() {
		registry.add_service_by_name(&directive.service, directive.options.clone()).await
	} else {
		registry.add_local_service(&directive.service, directive.options.clone()).await
	}
}

/// Applies every directive in order, continuing past failures.
pub async fn apply_directives(registry: &ServiceRegistry, directives: &[Directive], report: &mut BootReport) {
	for directive in directives {
		let outcome = apply_directive(registry, directive).await;
		report.record(registry, &directive.service, outcome);
	}
}

/// Processes start-up arguments in order.
pub async fn run<I, S>(registry: &ServiceRegistry, args: I) -> BootReport
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut report = BootReport::default();
	for arg in args {
		match parse_arg(arg.as_ref()) {
			None => {}
			Some(BootArg::SelfTest) => {
				let outcome = builtin::self_test(registry).await;
				report.record(registry, builtin::TEST_SERVICE, outcome);
			}
			Some(BootArg::Directive(directive)) => {
				let outcome = apply_directive(registry, &directive).await;
				report.record(registry, &directive.service, outcome);
			}
			Some(BootArg::Script(path)) => match tokio::fs::read_to_string(&path).await {
				Ok(text) => {
					let directives = directive::parse_script(&text);
					tracing::info!(path = %path.display(), count = directives.len(), "host.bootstrap.script");
					apply_directives(registry, &directives, &mut report).await;
				}
				Err(source) => {
					let err = BootError::Script { path, source };
					registry.error(&err);
					report.failures.push(err);
				}
			},
		}
	}
	report
}
