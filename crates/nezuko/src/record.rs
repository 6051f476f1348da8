//! Turns one line of the child's stderr into a record ready for a sink.
//!
//! Lines that are already JSON objects pass through byte for byte. Anything
//! else is wrapped in an ECS-compatible envelope carrying the process-wide
//! default tags and labels.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const SCHEMA_VERSION: &str = "1.5.0";

/// Tags and labels stamped onto every wrapped line. Built once at startup and
/// shared read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
	pub tags: Vec<String>,
	pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
	#[serde(rename = "ecs.version")]
	pub schema_version: &'static str,
	#[serde(rename = "@timestamp")]
	pub timestamp: DateTime<Utc>,
	pub labels: &'a BTreeMap<String, String>,
	pub tags: &'a [String],
	pub message: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
	/// The line was a JSON object and is delivered untouched.
	Structured(Vec<u8>),
	/// The line was wrapped in an [`Envelope`].
	Wrapped(Vec<u8>),
}

impl Record {
	pub fn from_line(line: &[u8], defaults: &Defaults) -> serde_json::Result<Self> {
		Self::from_line_at(line, defaults, Utc::now())
	}

	pub fn from_line_at(
		line: &[u8],
		defaults: &Defaults,
		captured_at: DateTime<Utc>,
	) -> serde_json::Result<Self> {
		if is_json_object(line) {
			return Ok(Record::Structured(line.to_vec()));
		}

		let message = String::from_utf8_lossy(line);
		let envelope = Envelope {
			schema_version: SCHEMA_VERSION,
			timestamp: captured_at,
			labels: &defaults.labels,
			tags: &defaults.tags,
			message: &message,
		};
		serde_json::to_vec(&envelope).map(Record::Wrapped)
	}

	pub fn as_bytes(&self) -> &[u8] {
		match self {
			Record::Structured(bytes) | Record::Wrapped(bytes) => bytes,
		}
	}

	pub fn is_structured(&self) -> bool {
		matches!(self, Record::Structured(_))
	}
}

fn is_json_object(line: &[u8]) -> bool {
	serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(line).is_ok()
}

/// Strips the trailing newline and, if present, the carriage return before it.
pub fn trim_line_ending(mut line: &[u8]) -> &[u8] {
	if let Some(rest) = line.strip_suffix(b"\n") {
		line = rest;
	}
	if let Some(rest) = line.strip_suffix(b"\r") {
		line = rest;
	}
	line
}
