//! Shared storage integration tests.
//!
//! Tests the `Store` contract against every backend. Each backend's test
//! crate imports these functions and runs them through `run_store_tests!`.

pub mod store_tests;
