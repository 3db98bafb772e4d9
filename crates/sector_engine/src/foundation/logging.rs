//! Logging utilities
//!
//! The crate logs through the `log` facade; applications pick the backend.
//! [`init`] wires up `env_logger` for binaries and tests that want output.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Initialize logging with a default level, still overridable by `RUST_LOG`
///
/// Safe to call more than once; later calls are ignored.
pub fn init_with_level(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .is_test(cfg!(test))
        .try_init();
}
