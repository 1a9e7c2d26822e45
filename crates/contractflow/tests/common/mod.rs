//! Shared test utilities for contractflow integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated pipeline runs over a temporary SQLite file
//! - `ScriptedTransport` standing in for the model backends
//! - Builders and fixtures for configurations and documents

pub mod builders;
pub mod harness;
pub mod transport;

pub use builders::*;
pub use harness::TestHarness;
pub use transport::ScriptedTransport;
