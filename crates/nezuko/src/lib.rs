//! # nezuko
//!
//! Sidecar supervisor for a single containerised program.
//!
//! nezuko launches one child, behaves as its init when it is the container's
//! pid 1, relays termination signals to it, reaps zombie descendants, and turns
//! every line the child writes to stderr into a structured record handed to a
//! pluggable [`Sink`]. The child's stdout is passed through untouched.
//!
//! ```rust,no_run
//! use nezuko::{Config, SinkRegistry, Supervisor};
//!
//! # #[tokio::main]
//! # async fn main() -> nezuko::Result<()> {
//! let config = Config::from_env()?;
//! let supervisor = Supervisor::new(config, &SinkRegistry::builtin())?;
//! let reason = supervisor.run("my-server", &["--port".to_string(), "8080".to_string()]).await?;
//! println!("stopped: {}", reason);
//! # Ok(())
//! # }
//! ```

pub mod child;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod reaper;
pub mod record;
pub mod relay;
pub mod sink;
pub mod supervisor;

pub use config::Config;
pub use error::{Error, Result};
pub use record::{Defaults, Record};
pub use sink::{Sink, SinkError, SinkRegistry};
pub use supervisor::{ShutdownReason, Supervisor};
