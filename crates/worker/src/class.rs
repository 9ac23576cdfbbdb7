use std::fmt;

/// What a spawned task does on behalf of the host. Carried into logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// One deadline-bounded call into a hosted service.
	Control,
	/// A service run loop, alive from start until stop or kill.
	RunLoop,
	/// Directory scans and file reads kept off the async workers.
	IoBlocking,
}

impl fmt::Display for TaskClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Control => "control",
			Self::RunLoop => "run_loop",
			Self::IoBlocking => "io_blocking",
		})
	}
}
