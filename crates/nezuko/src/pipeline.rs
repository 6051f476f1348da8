use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::record::{self, Defaults, Record};
use crate::sink::Sink;

/// Longest line handed to the sink in one record. Longer lines are split.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Classifies stderr lines and hands them to the sink on a bounded pool of
/// delivery tasks. Delivery order across lines is not preserved.
#[derive(Clone)]
pub struct LogPipeline {
	sink: Arc<dyn Sink>,
	defaults: Arc<Defaults>,
	slots: Arc<Semaphore>,
	capacity: u32,
}

impl LogPipeline {
	pub fn new(sink: Arc<dyn Sink>, defaults: Arc<Defaults>, max_in_flight: usize) -> Self {
		let capacity = max_in_flight.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize)) as u32;
		Self {
			sink,
			defaults,
			slots: Arc::new(Semaphore::new(capacity as usize)),
			capacity,
		}
	}

	/// Reads `reader` to end-of-stream, dispatching one delivery task per line.
	/// Waits only for a free delivery slot, never for a delivery to finish.
	/// Returns the number of records dispatched. Read errors end the loop.
	pub async fn pipe_lines<R>(&self, mut reader: R) -> u64
	where
		R: AsyncBufRead + Unpin,
	{
		let mut count = 0u64;
		let mut buf = Vec::new();
		let mut oversized = false;
		loop {
			buf.clear();
			let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
			match limited.read_until(b'\n', &mut buf).await {
				Ok(0) => break,
				Ok(n) => {
					let split = n == MAX_LINE_BYTES && buf.last() != Some(&b'\n');
					let line = record::trim_line_ending(&buf);
					// the bare line ending left over from a line that was split
					if oversized && !split && line.is_empty() {
						oversized = false;
						continue;
					}
					if split && !oversized {
						tracing::warn!("child stderr line exceeds {} bytes, splitting it", MAX_LINE_BYTES);
					}
					oversized = split;
					count += 1;
					self.dispatch(line.to_vec()).await;
				}
				Err(e) => {
					tracing::warn!("error reading child stderr: {}", e);
					break;
				}
			}
		}
		count
	}

	pub async fn dispatch(&self, line: Vec<u8>) {
		let permit = match Arc::clone(&self.slots).acquire_owned().await {
			Ok(p) => p,
			Err(_) => return,
		};
		let sink = Arc::clone(&self.sink);
		let defaults = Arc::clone(&self.defaults);
		tokio::spawn(async move {
			emit(sink.as_ref(), &defaults, &line).await;
			drop(permit);
		});
	}

	/// Blocks until no delivery is in flight or `deadline` passes. Returns true
	/// when everything dispatched so far has finished.
	pub async fn drain(&self, deadline: Instant) -> bool {
		match tokio::time::timeout_at(deadline, self.slots.acquire_many(self.capacity)).await {
			Ok(Ok(all)) => {
				drop(all);
				true
			}
			_ => false,
		}
	}

	pub fn in_flight(&self) -> usize {
		self.capacity as usize - self.slots.available_permits()
	}
}

/// Classifies one line and delivers it. Failures are logged and contained.
pub async fn emit(sink: &dyn Sink, defaults: &Defaults, line: &[u8]) {
	let record = match Record::from_line(line, defaults) {
		Ok(r) => r,
		Err(e) => {
			tracing::warn!(
				line = %String::from_utf8_lossy(line),
				"failed to wrap log line: {}", e
			);
			return;
		}
	};
	tracing::trace!(structured = record.is_structured(), "delivering record");
	if let Err(e) = sink.handle(record.as_bytes()).await {
		tracing::warn!(
			record = %String::from_utf8_lossy(record.as_bytes()),
			"error emitting record: {}", e
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sink::SinkError;
	use async_trait::async_trait;
	use std::collections::BTreeMap;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;
	use tokio::sync::Mutex;

	#[derive(Default)]
	struct Recording {
		records: Mutex<Vec<Vec<u8>>>,
	}

	#[async_trait]
	impl Sink for Recording {
		async fn handle(&self, record: &[u8]) -> Result<(), SinkError> {
			// jitter so deliveries finish out of order
			let jitter = record.iter().map(|b| *b as u64).sum::<u64>() % 7;
			tokio::time::sleep(Duration::from_millis(jitter)).await;
			self.records.lock().await.push(record.to_vec());
			Ok(())
		}
	}

	/// Rejects every other record.
	#[derive(Default)]
	struct Flaky {
		calls: AtomicUsize,
		accepted: Mutex<Vec<Vec<u8>>>,
	}

	#[async_trait]
	impl Sink for Flaky {
		async fn handle(&self, record: &[u8]) -> Result<(), SinkError> {
			if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
				return Err(SinkError::Unavailable("try later".into()));
			}
			self.accepted.lock().await.push(record.to_vec());
			Ok(())
		}
	}

	struct Stalled;

	#[async_trait]
	impl Sink for Stalled {
		async fn handle(&self, _record: &[u8]) -> Result<(), SinkError> {
			std::future::pending::<()>().await;
			Ok(())
		}
	}

	fn defaults() -> Arc<Defaults> {
		Arc::new(Defaults {
			tags: vec!["batch".into()],
			labels: BTreeMap::from([("app".to_string(), "shop".to_string())]),
		})
	}

	fn deadline(ms: u64) -> Instant {
		Instant::now() + Duration::from_millis(ms)
	}

	#[tokio::test]
	async fn every_line_is_delivered_in_any_order() {
		let sink = Arc::new(Recording::default());
		let pipeline = LogPipeline::new(sink.clone(), defaults(), 8);

		let input: String = (0..100).map(|i| format!("line {}\n", i)).collect();
		let read = pipeline.pipe_lines(input.as_bytes()).await;
		assert_eq!(read, 100);
		assert!(pipeline.drain(deadline(5000)).await);
		assert_eq!(pipeline.in_flight(), 0);

		let records = sink.records.lock().await;
		assert_eq!(records.len(), 100);
		let mut messages: Vec<String> = records
			.iter()
			.map(|r| {
				let v: serde_json::Value = serde_json::from_slice(r).unwrap();
				assert_eq!(v["tags"], serde_json::json!(["batch"]));
				assert_eq!(v["labels"], serde_json::json!({"app": "shop"}));
				v["message"].as_str().unwrap().to_string()
			})
			.collect();
		messages.sort();
		let mut expected: Vec<String> = (0..100).map(|i| format!("line {}", i)).collect();
		expected.sort();
		assert_eq!(messages, expected);
	}

	#[tokio::test]
	async fn structured_and_plain_lines_mix() {
		let sink = Arc::new(Recording::default());
		let pipeline = LogPipeline::new(sink.clone(), defaults(), 4);

		let input = "{\"level\":\"info\",\"msg\":\"hi\"}\r\nplain text line\nno trailing newline";
		assert_eq!(pipeline.pipe_lines(input.as_bytes()).await, 3);
		assert!(pipeline.drain(deadline(5000)).await);

		let records = sink.records.lock().await;
		assert_eq!(records.len(), 3);
		assert!(records.iter().any(|r| r == br#"{"level":"info","msg":"hi"}"#));
		let wrapped: Vec<serde_json::Value> = records
			.iter()
			.filter(|r| r.as_slice() != br#"{"level":"info","msg":"hi"}"#)
			.map(|r| serde_json::from_slice(r).unwrap())
			.collect();
		let mut messages: Vec<&str> = wrapped.iter().map(|v| v["message"].as_str().unwrap()).collect();
		messages.sort();
		assert_eq!(messages, vec!["no trailing newline", "plain text line"]);
	}

	#[tokio::test]
	async fn overlong_lines_are_split() {
		let sink = Arc::new(Recording::default());
		let pipeline = LogPipeline::new(sink.clone(), defaults(), 4);

		let long = "a".repeat(MAX_LINE_BYTES * 2 + 10);
		let exact = "b".repeat(MAX_LINE_BYTES);
		let input = format!("{}\n{}\nshort\n", long, exact);
		assert_eq!(pipeline.pipe_lines(input.as_bytes()).await, 5);
		assert!(pipeline.drain(deadline(5000)).await);

		let records = sink.records.lock().await;
		let mut lengths: Vec<(char, usize)> = records
			.iter()
			.map(|r| {
				let v: serde_json::Value = serde_json::from_slice(r).unwrap();
				let message = v["message"].as_str().unwrap();
				(message.chars().next().unwrap(), message.len())
			})
			.collect();
		lengths.sort();
		assert_eq!(
			lengths,
			vec![
				('a', 10),
				('a', MAX_LINE_BYTES),
				('a', MAX_LINE_BYTES),
				('b', MAX_LINE_BYTES),
				('s', 5),
			]
		);
	}

	#[tokio::test]
	async fn delivery_errors_do_not_stop_the_loop() {
		let sink = Arc::new(Flaky::default());
		let pipeline = LogPipeline::new(sink.clone(), defaults(), 1);

		let input: String = (0..10).map(|i| format!("{{\"n\":{}}}\n", i)).collect();
		assert_eq!(pipeline.pipe_lines(input.as_bytes()).await, 10);
		assert!(pipeline.drain(deadline(5000)).await);

		assert_eq!(sink.calls.load(Ordering::SeqCst), 10);
		assert_eq!(sink.accepted.lock().await.len(), 5);
	}

	#[tokio::test]
	async fn drain_gives_up_at_deadline() {
		let pipeline = LogPipeline::new(Arc::new(Stalled), defaults(), 4);
		pipeline.dispatch(b"stuck".to_vec()).await;
		assert_eq!(pipeline.in_flight(), 1);

		let started = std::time::Instant::now();
		assert!(!pipeline.drain(deadline(100)).await);
		assert!(started.elapsed() >= Duration::from_millis(90));
		assert_eq!(pipeline.in_flight(), 1);
	}

	#[tokio::test]
	async fn full_pool_applies_backpressure() {
		let pipeline = LogPipeline::new(Arc::new(Stalled), defaults(), 2);
		pipeline.dispatch(b"a".to_vec()).await;
		pipeline.dispatch(b"b".to_vec()).await;

		let third = tokio::time::timeout(Duration::from_millis(100), pipeline.dispatch(b"c".to_vec())).await;
		assert!(third.is_err());
		assert_eq!(pipeline.in_flight(), 2);
	}
}
