pub mod null;
pub mod stderr;

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;

pub use null::NullSink;
pub use stderr::StderrSink;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("{0}")]
	Unavailable(String),
}

/// A delivery target for serialized log records.
///
/// `setup` runs once before the first record and `teardown` once on shutdown.
/// `handle` is called concurrently from many delivery tasks, so implementations
/// must guard their own state.
#[async_trait]
pub trait Sink: Send + Sync {
	async fn setup(&self) -> Result<(), SinkError> {
		Ok(())
	}

	async fn handle(&self, record: &[u8]) -> Result<(), SinkError>;

	async fn teardown(&self) -> Result<(), SinkError> {
		Ok(())
	}
}

pub type SinkFactory = fn() -> Arc<dyn Sink>;

/// Name to sink lookup table, filled during startup and consulted once.
#[derive(Default)]
pub struct SinkRegistry {
	factories: BTreeMap<String, SinkFactory>,
}

impl SinkRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registry holding every sink bundled with nezuko.
	pub fn builtin() -> Self {
		let mut registry = Self::new();
		registry.register("stderr", || Arc::new(StderrSink::new()));
		registry.register("null", || Arc::new(NullSink));
		registry
	}

	pub fn register(&mut self, name: impl Into<String>, factory: SinkFactory) {
		self.factories.insert(name.into(), factory);
	}

	pub fn resolve(&self, name: &str) -> Result<Arc<dyn Sink>, Error> {
		self.factories
			.get(name)
			.map(|factory| factory())
			.ok_or_else(|| Error::UnknownSink {
				name: name.to_string(),
				available: self.names(),
			})
	}

	pub fn names(&self) -> Vec<String> {
		self.factories.keys().cloned().collect()
	}
}
