//! Cooperative lifecycle state machine shared by threaded services.
//!
//! A [`Lifecycle`] owns at most one run-loop task at a time. Stopping is
//! cooperative: the loop's [`RunContext`] is cancelled and the task is joined
//! for [`STOP_GRACE`]. A loop that ignores cancellation leaves the machine in
//! STOPPING until someone escalates to [`Lifecycle::kill`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use svchost_worker::{GenerationClock, RunToken, TaskClass, TaskExit, TaskJoin};
use tokio::sync::{broadcast, watch};

use crate::{ConfigProperties, LifecycleError, Service, ServiceError, ServiceState};

/// How long `stop` waits for the run loop to observe cancellation.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// Version label used in instance ids unless overridden.
pub const DEFAULT_VERSION: &str = "1.0";

const TRANSITION_BUFFER: usize = 64;

/// One observed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
	pub from: ServiceState,
	pub to: ServiceState,
	/// Set for the reset performed by a kill, which bypasses the machine.
	pub forced: bool,
}

/// Handle a run loop uses to observe stop and pause requests.
pub struct RunContext {
	token: RunToken,
	paused: watch::Receiver<bool>,
	config: ConfigProperties,
}

impl RunContext {
	/// Generation of this run; increases on every start.
	pub fn generation(&self) -> u64 {
		self.token.generation()
	}

	pub fn should_stop(&self) -> bool {
		self.token.stop_requested()
	}

	/// Resolves once a stop has been requested.
	pub async fn cancelled(&self) {
		self.token.stopped().await;
	}

	pub fn is_paused(&self) -> bool {
		*self.paused.borrow()
	}

	/// Configuration snapshot taken when the run started.
	pub fn config(&self) -> &ConfigProperties {
		&self.config
	}

	/// Parks while the service is paused.
	///
	/// Returns `false` if a stop was requested, `true` once the loop may
	/// continue.
	pub async fn wait_while_paused(&mut self) -> bool {
		loop {
			if self.should_stop() {
				return false;
			}
			let paused = *self.paused.borrow_and_update();
			if !paused {
				return true;
			}
			tokio::select! {
				_ = self.token.stopped() => return false,
				changed = self.paused.changed() => {
					if changed.is_err() {
						return !self.should_stop();
					}
				}
			}
		}
	}
}

/// Body of a threaded service, run once per start.
#[async_trait]
pub trait RunLoop: Send + Sync + 'static {
	async fn run(&self, ctx: RunContext);
}

#[derive(Clone)]
struct RunTask {
	join: Arc<TaskJoin>,
	token: RunToken,
}

/// State and run task, always changed together under one lock.
struct Machine {
	state: ServiceState,
	task: Option<RunTask>,
	last_exit: Option<TaskExit>,
}

/// State plus the run-loop task it governs.
///
/// Every check-and-transition happens under one lock, so concurrent control
/// calls serialize and a call that finds the machine in the wrong state is
/// rejected instead of interleaving.
pub struct Lifecycle {
	machine: Mutex<Machine>,
	paused: watch::Sender<bool>,
	transitions: broadcast::Sender<Transition>,
	generations: GenerationClock,
}

impl Default for Lifecycle {
	fn default() -> Self {
		Self::new()
	}
}

impl Lifecycle {
	pub fn new() -> Self {
		Self {
			machine: Mutex::new(Machine {
				state: ServiceState::Stopped,
				task: None,
				last_exit: None,
			}),
			paused: watch::channel(false).0,
			transitions: broadcast::channel(TRANSITION_BUFFER).0,
			generations: GenerationClock::new(),
		}
	}

	pub fn state(&self) -> ServiceState {
		self.machine.lock().state
	}

	/// Subscribes to subsequent state changes.
	pub fn transitions(&self) -> broadcast::Receiver<Transition> {
		self.transitions.subscribe()
	}

	/// Whether a run-loop task exists and has not finished.
	pub fn is_alive(&self) -> bool {
		self.machine.lock().task.as_ref().is_some_and(|task| !task.join.is_finished())
	}

	/// How the most recent run loop ended, if one has.
	pub fn last_exit(&self) -> Option<TaskExit> {
		let machine = self.machine.lock();
		machine.task.as_ref().and_then(|task| task.join.exit()).or_else(|| machine.last_exit.clone())
	}

	/// Launches a fresh run loop built by `run`.
	///
	/// Rejected while a previous run loop is still alive.
	pub fn start<F, Fut>(&self, config: ConfigProperties, run: F) -> Result<u64, LifecycleError>
	where
		F: FnOnce(RunContext) -> Fut,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let mut machine = self.machine.lock();
		if let Some(current) = machine.task.as_ref()
			&& !current.join.is_finished()
		{
			tracing::warn!(generation = current.token.generation(), "host.lifecycle.start_rejected");
			return Err(LifecycleError::AlreadyRunning);
		}
		if let Some(ended) = machine.task.take() {
			machine.last_exit = ended.join.exit();
		}

		// A loop that ended on its own still reports its last state.
		if machine.state != ServiceState::Stopped {
			self.advance(&mut machine, "start", ServiceState::Stopping)?;
			self.advance(&mut machine, "start", ServiceState::Stopped)?;
		}

		self.advance(&mut machine, "start", ServiceState::Starting)?;
		self.paused.send_replace(false);
		let token = self.generations.issue();
		let generation = token.generation();
		let ctx = RunContext {
			token: token.clone(),
			paused: self.paused.subscribe(),
			config,
		};
		let join = TaskJoin::spawn(TaskClass::RunLoop, run(ctx));
		machine.task = Some(RunTask {
			join: Arc::new(join),
			token,
		});
		self.advance(&mut machine, "start", ServiceState::Running)?;
		tracing::debug!(generation, "host.lifecycle.started");
		Ok(generation)
	}

	/// Requests a cooperative stop and waits up to [`STOP_GRACE`].
	///
	/// On timeout the state stays STOPPING.
	pub async fn stop(&self) -> Result<(), LifecycleError> {
		let task = {
			let mut machine = self.machine.lock();
			let Some(task) = machine.task.clone() else {
				if machine.state != ServiceState::Stopped {
					self.advance(&mut machine, "stop", ServiceState::Stopping)?;
					self.advance(&mut machine, "stop", ServiceState::Stopped)?;
				}
				return Ok(());
			};
			self.advance(&mut machine, "stop", ServiceState::Stopping)?;
			task.token.request_stop();
			task
		};
		let generation = task.token.generation();
		tracing::debug!(generation, "host.lifecycle.stop_requested");

		let Some(exit) = task.join.join_with_timeout(STOP_GRACE).await else {
			tracing::warn!(generation, grace = ?STOP_GRACE, "host.lifecycle.stop_timeout");
			return Err(LifecycleError::StopTimedOut { grace: STOP_GRACE });
		};
		if let TaskExit::Panicked(message) = &exit {
			tracing::warn!(generation, %message, "host.lifecycle.run_loop_panicked");
		}

		let mut machine = self.machine.lock();
		// A kill or a newer start may have replaced this run meanwhile.
		if machine.task.as_ref().is_some_and(|current| current.token.generation() == generation) {
			machine.task = None;
			machine.last_exit = Some(exit);
			self.advance(&mut machine, "stop", ServiceState::Stopped)?;
		}
		Ok(())
	}

	/// RUNNING → PAUSING → PAUSED. The run loop observes the flag.
	pub fn pause(&self) -> Result<(), LifecycleError> {
		let mut machine = self.machine.lock();
		expect_state(&machine, "pause", ServiceState::Running)?;
		self.advance(&mut machine, "pause", ServiceState::Pausing)?;
		self.paused.send_replace(true);
		self.advance(&mut machine, "pause", ServiceState::Paused)
	}

	/// PAUSED → RESUMING → RUNNING.
	pub fn resume(&self) -> Result<(), LifecycleError> {
		let mut machine = self.machine.lock();
		expect_state(&machine, "resume", ServiceState::Paused)?;
		self.advance(&mut machine, "resume", ServiceState::Resuming)?;
		self.paused.send_replace(false);
		self.advance(&mut machine, "resume", ServiceState::Running)
	}

	/// Cancels and aborts the run loop, then forces STOPPED.
	pub fn kill(&self) {
		let mut machine = self.machine.lock();
		if let Some(task) = machine.task.take() {
			task.token.request_stop();
			task.join.abort();
			machine.last_exit = Some(TaskExit::Aborted);
			tracing::info!(generation = task.token.generation(), "host.lifecycle.killed");
		}
		self.paused.send_replace(false);
		let from = std::mem::replace(&mut machine.state, ServiceState::Stopped);
		if from != ServiceState::Stopped {
			let _ = self.transitions.send(Transition {
				from,
				to: ServiceState::Stopped,
				forced: true,
			});
		}
	}

	/// Moves the machine to `to`, refusing edges the machine does not have.
	fn advance(&self, machine: &mut Machine, operation: &'static str, to: ServiceState) -> Result<(), LifecycleError> {
		let from = machine.state;
		if from == to {
			return Ok(());
		}
		if !from.can_transition_to(to) {
			tracing::warn!(operation, %from, %to, "host.lifecycle.transition_rejected");
			return Err(LifecycleError::InvalidTransition { operation, state: from });
		}
		machine.state = to;
		tracing::trace!(%from, %to, "host.lifecycle.transition");
		let _ = self.transitions.send(Transition { from, to, forced: false });
		Ok(())
	}
}

fn expect_state(machine: &Machine, operation: &'static str, wanted: ServiceState) -> Result<(), LifecycleError> {
	if machine.state == wanted {
		Ok(())
	} else {
		Err(LifecycleError::InvalidTransition {
			operation,
			state: machine.state,
		})
	}
}

static INSTANCE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Reusable service base: identity, configuration and a [`Lifecycle`]
/// driving one [`RunLoop`].
pub struct ThreadedService<R> {
	type_name: String,
	version: String,
	stamp: String,
	config: RwLock<ConfigProperties>,
	lifecycle: Lifecycle,
	run_loop: Arc<R>,
}

impl<R: RunLoop> ThreadedService<R> {
	pub fn new(type_name: impl Into<String>, run_loop: R) -> Self {
		let millis = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default();
		let seq = INSTANCE_SEQ.fetch_add(1, Ordering::Relaxed);
		Self {
			type_name: type_name.into(),
			version: DEFAULT_VERSION.to_string(),
			stamp: format!("{millis}.{seq}"),
			config: RwLock::new(ConfigProperties::new()),
			lifecycle: Lifecycle::new(),
			run_loop: Arc::new(run_loop),
		}
	}

	#[must_use]
	pub fn with_version(mut self, version: impl Into<String>) -> Self {
		self.version = version.into();
		self
	}

	pub fn lifecycle(&self) -> &Lifecycle {
		&self.lifecycle
	}

	pub fn run_loop(&self) -> &R {
		&self.run_loop
	}
}

#[async_trait]
impl<R: RunLoop> Service for ThreadedService<R> {
	fn type_name(&self) -> &str {
		&self.type_name
	}

	async fn start(&self) -> Result<(), ServiceError> {
		let run_loop = Arc::clone(&self.run_loop);
		let config = self.config.read().clone();
		self.lifecycle.start(config, move |ctx| async move { run_loop.run(ctx).await })?;
		Ok(())
	}

	async fn stop(&self) -> Result<(), ServiceError> {
		Ok(self.lifecycle.stop().await?)
	}

	async fn pause(&self) -> Result<(), ServiceError> {
		Ok(self.lifecycle.pause()?)
	}

	async fn resume(&self) -> Result<(), ServiceError> {
		Ok(self.lifecycle.resume()?)
	}

	fn state(&self) -> ServiceState {
		self.lifecycle.state()
	}

	fn instance_id(&self) -> String {
		format!("{}:{}:{}", self.type_name, self.version, self.stamp)
	}

	fn config_info(&self) -> ConfigProperties {
		self.config.read().clone()
	}

	fn set_config_info(&self, config: ConfigProperties) {
		*self.config.write() = config;
	}

	fn kill(&self) {
		self.lifecycle.kill();
	}
}
