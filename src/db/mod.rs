// src/db/mod.rs
// SQLite storage layer: pooling, schema, vector encoding.

pub mod pool;
pub mod schema;
pub mod vector;

#[cfg(test)]
pub mod test_support;

pub use pool::DatabasePool;
