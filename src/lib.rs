// src/lib.rs
// Engram - layered user-memory store for AI chat applications

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod db;
pub mod error;
pub mod memory;

pub use db::DatabasePool;
pub use error::{EngramError, Result};
pub use memory::UserMemoryStore;
