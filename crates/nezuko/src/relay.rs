use std::fmt;
use std::io;

use nix::sys::signal::{kill, Signal};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::child::{self, ChildState};

/// Termination signals relayed to the child. SIGKILL cannot be caught, so it
/// never reaches us and has no entry here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayedSignal {
	Hangup,
	Interrupt,
	Terminate,
}

impl RelayedSignal {
	/// The signal delivered to the child. The mapping is one to one.
	pub fn for_child(self) -> Signal {
		match self {
			RelayedSignal::Hangup => Signal::SIGHUP,
			RelayedSignal::Interrupt => Signal::SIGINT,
			RelayedSignal::Terminate => Signal::SIGTERM,
		}
	}

	fn kind(self) -> SignalKind {
		match self {
			RelayedSignal::Hangup => SignalKind::hangup(),
			RelayedSignal::Interrupt => SignalKind::interrupt(),
			RelayedSignal::Terminate => SignalKind::terminate(),
		}
	}
}

impl fmt::Display for RelayedSignal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.for_child())
	}
}

/// Armed signal handlers. Creating one installs the handlers, so do it
/// before spawning the child.
pub struct SignalRelay {
	hangup: tokio::signal::unix::Signal,
	interrupt: tokio::signal::unix::Signal,
	terminate: tokio::signal::unix::Signal,
}

impl SignalRelay {
	pub fn arm() -> io::Result<Self> {
		Ok(Self {
			hangup: signal(RelayedSignal::Hangup.kind())?,
			interrupt: signal(RelayedSignal::Interrupt.kind())?,
			terminate: signal(RelayedSignal::Terminate.kind())?,
		})
	}

	async fn recv(&mut self) -> Option<RelayedSignal> {
		tokio::select! {
			Some(()) = self.hangup.recv() => Some(RelayedSignal::Hangup),
			Some(()) = self.interrupt.recv() => Some(RelayedSignal::Interrupt),
			Some(()) = self.terminate.recv() => Some(RelayedSignal::Terminate),
			else => None,
		}
	}

	/// Runs the relay for the rest of the process. Every signal is forwarded to
	/// the child and then reported on `shutdown`; the receiver decides when the
	/// process ends.
	pub fn spawn(
		mut self,
		mut state: watch::Receiver<ChildState>,
		shutdown: mpsc::Sender<RelayedSignal>,
	) -> JoinHandle<()> {
		tokio::spawn(async move {
			while let Some(sig) = self.recv().await {
				tracing::info!("signal received: {}", sig);
				forward(&mut state, sig).await;
				// a full channel means shutdown is already under way
				let _ = shutdown.try_send(sig);
			}
		})
	}
}

/// Delivers `sig` to the child. A signal that arrives while the child is
/// still being spawned is held until its pid is known.
pub async fn forward(state: &mut watch::Receiver<ChildState>, sig: RelayedSignal) {
	match child::settled(state).await {
		Some(ChildState::Running(pid)) => {
			tracing::info!("sending {} to child {}", sig.for_child(), pid);
			if let Err(e) = kill(pid, sig.for_child()) {
				tracing::warn!("failed to signal child {}: {}", pid, e);
			}
		}
		Some(ChildState::Exited(pid)) => {
			tracing::info!("child {} already exited, not forwarding {}", pid, sig);
		}
		Some(ChildState::Pending) | None => {
			tracing::warn!("no child to forward {} to", sig);
		}
	}
}
