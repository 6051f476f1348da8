use std::io::IsTerminal;

use nezuko::config::{self, Config};
use nezuko::{ShutdownReason, SinkRegistry, Supervisor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
	init_tracing();

	let args: Vec<String> = std::env::args().skip(1).collect();
	let Some((program, child_args)) = args.split_first() else {
		eprintln!("usage: nezuko <command> [args...]");
		std::process::exit(2);
	};

	tracing::info!("initializing nezuko");
	let code = match run(program, child_args).await {
		Ok(reason) => {
			tracing::info!("shutting down: {}", reason);
			0
		}
		Err(e) => {
			eprintln!("nezuko: {}", e);
			1
		}
	};

	// in-flight deliveries past the shutdown deadline are abandoned here
	std::process::exit(code);
}

async fn run(program: &str, args: &[String]) -> nezuko::Result<ShutdownReason> {
	let config = Config::from_env()?;
	tracing::info!("configured sink: {}", config.sink);

	let registry = SinkRegistry::builtin();
	let supervisor = Supervisor::new(config, &registry)?;
	supervisor.run(program, args).await
}

// Our own diagnostics go to stderr; stdout belongs to the child.
fn init_tracing() {
	let filter = EnvFilter::try_from_env(config::LOG_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(std::io::stderr().is_terminal())
		.init();
}
