use std::collections::BTreeMap;
use std::env::VarError;
use std::time::Duration;

use crate::record::Defaults;

pub const SINK_VAR: &str = "NEZUKO_SINK";
pub const TAGS_VAR: &str = "NEZUKO_TAGS";
pub const LABELS_VAR: &str = "NEZUKO_LABELS";
pub const MAX_IN_FLIGHT_VAR: &str = "NEZUKO_MAX_IN_FLIGHT";
pub const SHUTDOWN_TIMEOUT_VAR: &str = "NEZUKO_SHUTDOWN_TIMEOUT_MS";
pub const SUBREAPER_VAR: &str = "NEZUKO_SUBREAPER";
pub const LOG_VAR: &str = "NEZUKO_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("NEZUKO_TAGS must be a JSON array of strings: {0}")]
	Tags(#[source] serde_json::Error),

	#[error("NEZUKO_LABELS must be a JSON object of strings: {0}")]
	Labels(#[source] serde_json::Error),

	#[error("{0} is not valid UTF-8")]
	NotUnicode(&'static str),

	#[error("{var} must be {expected}, got {value:?}")]
	Invalid {
		var: &'static str,
		expected: &'static str,
		value: String,
	},
}

#[derive(Debug, Clone)]
pub struct Config {
	pub sink: String,
	pub defaults: Defaults,
	pub max_in_flight: usize,
	pub shutdown_timeout: Duration,
	pub subreaper: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			sink: default_sink(),
			defaults: Defaults::default(),
			max_in_flight: default_max_in_flight(),
			shutdown_timeout: default_shutdown_timeout(),
			subreaper: false,
		}
	}
}

fn default_sink() -> String {
	"stderr".to_string()
}
fn default_max_in_flight() -> usize {
	64
}
fn default_shutdown_timeout() -> Duration {
	Duration::from_millis(5000)
}

impl Config {
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(env_var)
	}

	/// Builds the configuration from an arbitrary variable source. Absent
	/// variables take their defaults; present but malformed ones are errors.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&'static str) -> Result<Option<String>, ConfigError>,
	{
		let sink = lookup(SINK_VAR)?.unwrap_or_else(default_sink);

		let tags: Vec<String> = match lookup(TAGS_VAR)? {
			Some(raw) => serde_json::from_str(&raw).map_err(ConfigError::Tags)?,
			None => Vec::new(),
		};
		let labels: BTreeMap<String, String> = match lookup(LABELS_VAR)? {
			Some(raw) => serde_json::from_str(&raw).map_err(ConfigError::Labels)?,
			None => BTreeMap::new(),
		};

		let max_in_flight = match lookup(MAX_IN_FLIGHT_VAR)? {
			Some(raw) => match raw.trim().parse::<usize>() {
				Ok(n) if n > 0 => n,
				_ => {
					return Err(ConfigError::Invalid {
						var: MAX_IN_FLIGHT_VAR,
						expected: "a positive integer",
						value: raw,
					})
				}
			},
			None => default_max_in_flight(),
		};

		let shutdown_timeout = match lookup(SHUTDOWN_TIMEOUT_VAR)? {
			Some(raw) => raw
				.trim()
				.parse::<u64>()
				.map(Duration::from_millis)
				.map_err(|_| ConfigError::Invalid {
					var: SHUTDOWN_TIMEOUT_VAR,
					expected: "a number of milliseconds",
					value: raw.clone(),
				})?,
			None => default_shutdown_timeout(),
		};

		let subreaper = match lookup(SUBREAPER_VAR)? {
			Some(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid {
				var: SUBREAPER_VAR,
				expected: "a boolean",
				value: raw.clone(),
			})?,
			None => false,
		};

		Ok(Self {
			sink,
			defaults: Defaults { tags, labels },
			max_in_flight,
			shutdown_timeout,
			subreaper,
		})
	}
}

/// Only an unset variable counts as absent. A value that is set but not
/// UTF-8 is an error rather than silently falling back to the default.
fn env_var(key: &'static str) -> Result<Option<String>, ConfigError> {
	match std::env::var(key) {
		Ok(value) => Ok(Some(value)),
		Err(VarError::NotPresent) => Ok(None),
		Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode(key)),
	}
}

fn parse_bool(raw: &str) -> Option<bool> {
	match raw.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" | "" => Some(false),
		_ => None,
	}
}
