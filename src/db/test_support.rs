// src/db/test_support.rs
// Shared helpers for database tests.

use super::DatabasePool;
use std::sync::Arc;

/// Fresh in-memory pool with migrations applied.
pub async fn test_pool() -> Arc<DatabasePool> {
    Arc::new(
        DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory test pool"),
    )
}

/// Deterministic embedding of the given dimensionality, seeded so distinct
/// seeds produce vectors that are not cosine-close.
pub fn test_embedding(dims: usize, seed: f32) -> Vec<f32> {
    (0..dims)
        .map(|i| ((i as f32) * 0.01 + seed).sin())
        .collect()
}
