use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{Sink, SinkError};

/// Writes one record per line to the supervisor's own stderr.
pub struct StderrSink {
	out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl StderrSink {
	pub fn new() -> Self {
		Self::with_writer(tokio::io::stderr())
	}

	pub fn with_writer<W>(writer: W) -> Self
	where
		W: AsyncWrite + Send + Unpin + 'static,
	{
		Self {
			out: Mutex::new(Box::new(writer)),
		}
	}
}

impl Default for StderrSink {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Sink for StderrSink {
	async fn handle(&self, record: &[u8]) -> Result<(), SinkError> {
		let mut line = Vec::with_capacity(record.len() + 1);
		line.extend_from_slice(record);
		line.push(b'\n');

		// one write per record so concurrent deliveries never interleave
		let mut out = self.out.lock().await;
		out.write_all(&line).await?;
		out.flush().await?;
		Ok(())
	}

	async fn teardown(&self) -> Result<(), SinkError> {
		self.out.lock().await.flush().await?;
		Ok(())
	}
}
