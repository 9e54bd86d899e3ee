// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Palaver integration tests.
//!
//! Provides fake adapters and fixtures for fast, deterministic,
//! CI-runnable tests without a network or a long-lived database.
//!
//! # Components
//!
//! - [`MemoryStore`] - In-memory store with failure switches
//! - [`TestConnection`] - Connection handle that captures pushed events
//! - [`TestStore`] - SQLite store on a temp-dir database

pub mod harness;
pub mod memory_store;
pub mod test_connection;

pub use harness::{TestStore, test_config, text_message};
pub use memory_store::MemoryStore;
pub use test_connection::TestConnection;
