//! Logging setup
//!
//! The library only talks to the `log` facade. Binaries and tests install
//! `env_logger` through these helpers; `RUST_LOG` overrides the default level.

pub use log::{debug, error, info, trace, warn};

use log::LevelFilter;

/// Install the logger at `info` unless `RUST_LOG` says otherwise
pub fn init() {
    init_with_level(LevelFilter::Info);
}

/// Install the logger with a default level. Returns false when a logger
/// was already installed.
pub fn init_with_level(level: LevelFilter) -> bool {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init()
        .is_ok()
}

/// Initialize logging for tests; safe to call from every test
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).filter_level(LevelFilter::Debug).parse_default_env().try_init();
}
