//! Collects the exit status of every descendant re-parented to us so none of
//! them linger as zombies. Needed when nezuko is pid 1, or a subreaper.

use std::io;
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::child::ChildTracker;

/// Starts the reaper loop. The SIGCHLD handler is registered before this
/// returns, so no exit that happens afterwards is missed.
pub fn spawn(tracker: Arc<ChildTracker>) -> io::Result<JoinHandle<()>> {
	let mut sigchld = signal(SignalKind::child())?;
	Ok(tokio::spawn(async move {
		loop {
			reap_exited(&tracker);
			if sigchld.recv().await.is_none() {
				tracing::warn!("SIGCHLD stream closed, reaper stopping");
				return;
			}
		}
	}))
}

/// Reaps every descendant that has already exited, without blocking.
/// Returns how many were collected.
pub fn reap_exited(tracker: &ChildTracker) -> usize {
	let mut reaped = 0;
	loop {
		match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
			Ok(WaitStatus::StillAlive) => break,
			Ok(status) => {
				reaped += 1;
				if let Some(pid) = status.pid() {
					if tracker.mark_exited(pid) {
						log_child_exit(pid, &status);
					} else {
						tracing::debug!("reaped descendant {}: {:?}", pid, status);
					}
				}
			}
			Err(Errno::EINTR) => continue,
			Err(Errno::ECHILD) => break,
			Err(e) => {
				tracing::warn!("waitpid failed: {}", e);
				break;
			}
		}
	}
	reaped
}

fn log_child_exit(pid: Pid, status: &WaitStatus) {
	match status {
		WaitStatus::Exited(_, code) => tracing::info!("child {} exited (code {})", pid, code),
		WaitStatus::Signaled(_, sig, _) => tracing::info!("child {} killed by {}", pid, sig),
		other => tracing::info!("child {} gone: {:?}", pid, other),
	}
}

/// Makes orphaned grandchildren re-parent to this process instead of pid 1,
/// so the reaper can collect them even when we are not init.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn become_subreaper() -> nix::Result<()> {
	nix::sys::prctl::set_child_subreaper(true)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn become_subreaper() -> nix::Result<()> {
	Err(Errno::ENOSYS)
}
