// SPDX-License-Identifier: GPL-3.0-only

//! Logging setup for embedders and tests
//!
//! Set the `RUST_LOG` environment variable to control the level, for example
//! `RUST_LOG=fisheye_qr_reader=debug`.

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG` (default `warn`)
///
/// Returns `false` when a global subscriber was already installed.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(true)
        .with_level(true)
        .try_init()
        .is_ok()
}

/// Like [`init`], writing through the test harness capture
pub fn init_for_tests() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init()
        .is_ok()
}
