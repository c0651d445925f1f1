//! Commands module - One builder per kboot binary

use tracing_subscriber::EnvFilter;

pub mod bootfs;
pub mod docker;
pub mod qemu;

/// Install the tracing subscriber; `RUST_LOG` overrides the default level.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "kboot=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
