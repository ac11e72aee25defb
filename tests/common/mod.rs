#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initialize tracing for integration tests. Safe to call repeatedly.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        alting::test_utils::init_test_logging();
    });
}

/// Tolerance applied to deadline assertions so loaded CI machines do not
/// flake: a timeout must land at or after its deadline and within this
/// much slack afterwards.
pub const TIMEOUT_SLACK: std::time::Duration = std::time::Duration::from_millis(750);
