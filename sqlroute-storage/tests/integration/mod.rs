//! Integration tests for sqlroute-storage
//!
//! These tests start a MySQL container and are skipped by default. Run with:
//!
//! ```sh
//! cargo test -p sqlroute-storage --test integration_tests --features integration-tests
//! ```

#[cfg(feature = "integration-tests")]
pub mod mysql_tests;

pub mod test_utils;
