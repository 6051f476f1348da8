use std::process::Stdio;
use std::sync::Mutex;

use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
	/// Spawn has not completed yet.
	Pending,
	Running(Pid),
	/// The reaper has collected the child's exit status.
	Exited(Pid),
}

impl ChildState {
	pub fn is_pending(&self) -> bool {
		matches!(self, ChildState::Pending)
	}
}

/// Handoff of the child's pid from the orchestrator (and the reaper, on exit)
/// to the signal relay.
pub struct ChildTracker {
	state: watch::Sender<ChildState>,
	// pids reaped while the child was still pending; the child may be among them
	reaped_early: Mutex<Vec<Pid>>,
}

impl ChildTracker {
	pub fn new() -> Self {
		let (state, _) = watch::channel(ChildState::Pending);
		Self {
			state,
			reaped_early: Mutex::new(Vec::new()),
		}
	}

	pub fn subscribe(&self) -> watch::Receiver<ChildState> {
		self.state.subscribe()
	}

	pub fn current(&self) -> ChildState {
		*self.state.borrow()
	}

	/// Publishes the child's pid. If the reaper already collected it, the
	/// child goes straight to [`ChildState::Exited`].
	pub fn record_spawned(&self, pid: Pid) -> ChildState {
		let mut early = self.reaped_early.lock().unwrap_or_else(|e| e.into_inner());
		let state = if early.contains(&pid) {
			ChildState::Exited(pid)
		} else {
			ChildState::Running(pid)
		};
		early.clear();
		self.state.send_replace(state);
		state
	}

	/// Called by the reaper for every collected pid. Returns true when `pid`
	/// was the running child.
	pub fn mark_exited(&self, pid: Pid) -> bool {
		let mut early = self.reaped_early.lock().unwrap_or_else(|e| e.into_inner());
		let mut pending = false;
		let was_child = self.state.send_if_modified(|state| match *state {
			ChildState::Running(current) if current == pid => {
				*state = ChildState::Exited(pid);
				true
			}
			ChildState::Pending => {
				pending = true;
				false
			}
			_ => false,
		});
		if pending {
			early.push(pid);
		}
		was_child
	}
}

impl Default for ChildTracker {
	fn default() -> Self {
		Self::new()
	}
}

/// Waits until the child has left [`ChildState::Pending`]. Returns `None` if
/// the tracker went away before a pid was ever published.
pub async fn settled(rx: &mut watch::Receiver<ChildState>) -> Option<ChildState> {
	match rx.wait_for(|state| !state.is_pending()).await {
		Ok(state) => Some(*state),
		Err(_) => None,
	}
}

pub struct SpawnedChild {
	pub child: Child,
	pub stderr: ChildStderr,
	pub pid: Pid,
}

/// Starts the supervised program. Stdout is inherited so it reaches the
/// container runtime untouched; stderr is piped for the log pipeline.
pub fn spawn(program: &str, args: &[String]) -> Result<SpawnedChild> {
	let mut cmd = Command::new(program);
	cmd.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::inherit())
		.stderr(Stdio::piped());

	let mut child = cmd.spawn().map_err(|source| Error::Spawn {
		program: program.to_string(),
		source,
	})?;

	let stderr = child.stderr.take().ok_or(Error::MissingStderr)?;
	let pid = child.id().ok_or(Error::ChildVanished)?;

	Ok(SpawnedChild {
		child,
		stderr,
		pid: Pid::from_raw(pid as i32),
	})
}
