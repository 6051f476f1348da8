use std::io;

use crate::config::ConfigError;
use crate::sink::SinkError;

/// Conditions that make continued operation meaningless. Each one aborts the
/// supervisor before the child is spawned or before any record is delivered.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid configuration: {0}")]
	Config(#[from] ConfigError),

	#[error("unknown sink {name:?} (available: {})", .available.join(", "))]
	UnknownSink { name: String, available: Vec<String> },

	#[error("sink {name:?} failed to set up: {source}")]
	SinkSetup {
		name: String,
		#[source]
		source: SinkError,
	},

	#[error("failed to register signal handlers: {0}")]
	SignalSetup(#[source] io::Error),

	#[error("failed to spawn {program}: {source}")]
	Spawn {
		program: String,
		#[source]
		source: io::Error,
	},

	#[error("child stderr was not captured")]
	MissingStderr,

	#[error("child exited before its pid could be recorded")]
	ChildVanished,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
