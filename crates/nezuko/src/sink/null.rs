use async_trait::async_trait;

use super::{Sink, SinkError};

/// Drops every record. Useful when only the stdout passthrough matters.
pub struct NullSink;

#[async_trait]
impl Sink for NullSink {
	async fn handle(&self, _record: &[u8]) -> Result<(), SinkError> {
		Ok(())
	}
}
