//! onair - radio play scoring pipeline
//!
//! Watches a station's now-playing feed, records every newly aired track
//! with a global play position, and credits the users who voted for it.
//! Stages are decoupled by queues and keep their state in a single-table
//! store.

pub mod bus;
pub mod catalog;
pub mod config;
pub mod feed;
pub mod handlers;
pub mod model;
pub mod repository;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use runtime::Pipeline;
