//! Line-oriented operator console.

use std::io;

use svchost_host::{ServiceRegistry, bootstrap, directive};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const HELP: &str = "\
commands:
  list                 show registered instance ids
  state <id>           show the state of one instance
  add <directive>      add a service, e.g. `add Heartbeat -interval-ms:500`
  pause <id>           pause an instance
  resume <id>          resume an instance
  remove <id>          stop (if needed) and remove an instance
  kill <id>            drop an instance without stopping it
  shutdown             remove every instance and leave
  help                 show this text
  quit                 leave the console";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	List,
	State(String),
	Add(String),
	Pause(String),
	Resume(String),
	Remove(String),
	Kill(String),
	Shutdown,
	Help,
	Quit,
}

impl Command {
	/// Parses one console line. Blank lines yield `Ok(None)`.
	pub fn parse(line: &str) -> Result<Option<Self>, String> {
		let line = line.trim();
		if line.is_empty() {
			return Ok(None);
		}
		let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
		let rest = rest.trim();
		let with_arg = |make: fn(String) -> Self| {
			if rest.is_empty() {
				Err(format!("{verb} needs an argument"))
			} else {
				Ok(Some(make(rest.to_string())))
			}
		};
		match verb.to_ascii_lowercase().as_str() {
			"list" | "ls" => Ok(Some(Self::List)),
			"state" => with_arg(Self::State),
			"add" => with_arg(Self::Add),
			"pause" => with_arg(Self::Pause),
			"resume" => with_arg(Self::Resume),
			"remove" | "rm" => with_arg(Self::Remove),
			"kill" => with_arg(Self::Kill),
			"shutdown" => Ok(Some(Self::Shutdown)),
			"help" | "?" => Ok(Some(Self::Help)),
			"quit" | "exit" => Ok(Some(Self::Quit)),
			other => Err(format!("unknown command '{other}', try help")),
		}
	}
}

/// How the console session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
	Quit,
	Shutdown,
	EndOfInput,
}

/// Serves console commands from `input` until quit, shutdown or EOF.
pub async fn run<R, W>(registry: &ServiceRegistry, input: R, mut output: W) -> io::Result<ConsoleExit>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut lines = input.lines();
	loop {
		output.write_all(b"svchost> ").await?;
		output.flush().await?;
		let Some(line) = lines.next_line().await? else {
			return Ok(ConsoleExit::EndOfInput);
		};
		let command = match Command::parse(&line) {
			Ok(Some(command)) => command,
			Ok(None) => continue,
			Err(message) => {
				output.write_all(format!("{message}\n").as_bytes()).await?;
				continue;
			}
		};
		tracing::debug!(?command, "svchost.console.command");
		let reply = match command {
			Command::Quit => return Ok(ConsoleExit::Quit),
			Command::Shutdown => {
				registry.shutdown().await;
				output.write_all(b"all services removed\n").await?;
				return Ok(ConsoleExit::Shutdown);
			}
			Command::Help => HELP.to_string(),
			Command::List => registry.directory_listing(),
			Command::State(id) => match registry.get_service(&id) {
				None => format!("no such instance: {id}"),
				Some(server) => match server.state().await {
					Some(state) => format!("{id}: {state}"),
					None => describe_failure(&id, server.last_error()),
				},
			},
			Command::Add(text) => match directive::parse_line(&text) {
				None => "nothing to add".to_string(),
				Some(directive) => match bootstrap::apply_directive(registry, &directive).await {
					Ok(server) => format!("added {}", server.id()),
					Err(err) => format!("add failed: {err}"),
				},
			},
			Command::Pause(id) => match registry.get_service(&id) {
				None => format!("no such instance: {id}"),
				Some(server) if server.pause().await => format!("{id} paused"),
				Some(server) => describe_failure(&id, server.last_error()),
			},
			Command::Resume(id) => match registry.get_service(&id) {
				None => format!("no such instance: {id}"),
				Some(server) if server.resume().await => format!("{id} resumed"),
				Some(server) => describe_failure(&id, server.last_error()),
			},
			Command::Remove(id) => {
				if registry.remove_service(&id).await {
					format!("{id} removed")
				} else {
					format!("no such instance: {id}")
				}
			}
			Command::Kill(id) => {
				if registry.kill_service(&id) {
					format!("{id} killed")
				} else {
					format!("no such instance: {id}")
				}
			}
		};
		output.write_all(reply.as_bytes()).await?;
		output.write_all(b"\n").await?;
	}
}

fn describe_failure(id: &str, error: Option<svchost_host::HostError>) -> String {
	match error {
		Some(err) => format!("{id}: {err}"),
		None => format!("{id}: call failed"),
	}
}
