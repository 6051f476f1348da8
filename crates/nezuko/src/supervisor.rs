use std::fmt;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::child::{self, ChildState, ChildTracker, SpawnedChild};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::LogPipeline;
use crate::reaper;
use crate::relay::{RelayedSignal, SignalRelay};
use crate::sink::{Sink, SinkRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
	/// The child closed its stderr, usually because it exited.
	EndOfStream,
	/// A termination signal was relayed to the child.
	Signal(RelayedSignal),
}

impl fmt::Display for ShutdownReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ShutdownReason::EndOfStream => write!(f, "child stderr closed"),
			ShutdownReason::Signal(sig) => write!(f, "received {}", sig),
		}
	}
}

pub struct Supervisor {
	config: Config,
	sink: Arc<dyn Sink>,
	tracker: Arc<ChildTracker>,
}

impl Supervisor {
	/// Resolves the configured sink. An unknown sink name is fatal.
	pub fn new(config: Config, registry: &SinkRegistry) -> Result<Self> {
		let sink = registry.resolve(&config.sink)?;
		Ok(Self {
			config,
			sink,
			tracker: Arc::new(ChildTracker::new()),
		})
	}

	/// Supervises `program` until its stderr closes or a termination signal
	/// arrives, then drains pending deliveries and tears the sink down.
	///
	/// The child's exit status is never waited for.
	pub async fn run(self, program: &str, args: &[String]) -> Result<ShutdownReason> {
		self.sink.setup().await.map_err(|source| Error::SinkSetup {
			name: self.config.sink.clone(),
			source,
		})?;

		if std::process::id() == 1 {
			tracing::info!("running as pid 1, reaping orphans");
		} else if self.config.subreaper {
			match reaper::become_subreaper() {
				Ok(()) => tracing::info!("registered as child subreaper"),
				Err(e) => tracing::warn!("could not become child subreaper: {}", e),
			}
		}
		reaper::spawn(Arc::clone(&self.tracker)).map_err(Error::SignalSetup)?;

		let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
		SignalRelay::arm()
			.map_err(Error::SignalSetup)?
			.spawn(self.tracker.subscribe(), shutdown_tx);

		let SpawnedChild { child: handle, stderr, pid } = child::spawn(program, args)?;
		tracing::info!("started {} (pid {})", program, pid);
		if let ChildState::Exited(_) = self.tracker.record_spawned(pid) {
			tracing::info!("child {} exited before it was tracked", pid);
		}

		let pipeline = LogPipeline::new(
			Arc::clone(&self.sink),
			Arc::new(self.config.defaults.clone()),
			self.config.max_in_flight,
		);

		let read_loop = pipeline.pipe_lines(BufReader::new(stderr));
		tokio::pin!(read_loop);

		let reason = tokio::select! {
			lines = &mut read_loop => {
				tracing::debug!("child stderr closed after {} lines", lines);
				ShutdownReason::EndOfStream
			}
			Some(sig) = shutdown_rx.recv() => ShutdownReason::Signal(sig),
		};

		let deadline = Instant::now() + self.config.shutdown_timeout;
		if let ShutdownReason::Signal(_) = reason {
			// let the child's last words through, keeping a quarter of the
			// budget to deliver them
			let cutoff = deadline - self.config.shutdown_timeout / 4;
			if tokio::time::timeout_at(cutoff, &mut read_loop).await.is_err() {
				tracing::warn!("child stderr still open at shutdown deadline");
			}
		}

		self.shutdown(&pipeline, deadline).await;
		drop(handle);
		Ok(reason)
	}

	async fn shutdown(&self, pipeline: &LogPipeline, deadline: Instant) {
		if !pipeline.drain(deadline).await {
			tracing::warn!(
				"abandoning {} in-flight log deliveries at shutdown deadline",
				pipeline.in_flight()
			);
		}

		tracing::info!("triggering sink teardown");
		if let Err(e) = self.sink.teardown().await {
			tracing::warn!("error tearing down sink {}: {}", self.config.sink, e);
		}
	}
}
