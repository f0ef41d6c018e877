//! Structured logging setup.
//!
//! Log level is controlled via `RUST_LOG` (e.g. `RUST_LOG=wgfleet=debug`);
//! defaults to `info`. Logs go to stderr so stdout stays reserved for
//! rendered configurations and QR codes.

use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}
