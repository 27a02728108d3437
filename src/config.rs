// src/config.rs
// Environment-based configuration - single source of truth for all env vars

use std::path::PathBuf;
use tracing::{debug, warn};

/// Default embedding width used when nothing is configured.
///
/// Matches the 1024-dimension vectors produced by the upstream embedding
/// service; every vector column in the store uses this width.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1024;

/// Store configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file path (ENGRAM_DB_PATH); None means in-memory
    pub db_path: Option<PathBuf>,
    /// Embedding vector width (ENGRAM_EMBEDDING_DIMENSIONS)
    pub embedding_dimensions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads `.env` from the current directory first (best-effort), then the
    /// process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let db_path = std::env::var("ENGRAM_DB_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let embedding_dimensions = match std::env::var("ENGRAM_EMBEDDING_DIMENSIONS") {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(d) if d > 0 => d,
                _ => {
                    warn!(
                        "Invalid ENGRAM_EMBEDDING_DIMENSIONS ({}), using default {}",
                        raw, DEFAULT_EMBEDDING_DIMENSIONS
                    );
                    DEFAULT_EMBEDDING_DIMENSIONS
                }
            },
            Err(_) => DEFAULT_EMBEDDING_DIMENSIONS,
        };

        let config = Self {
            db_path,
            embedding_dimensions,
        };
        debug!(?config, "Store configuration loaded");
        config
    }
}

/// Install a minimal tracing subscriber for embedding applications that
/// have not set one up themselves. Errors (e.g. a subscriber is already
/// installed) are ignored.
pub fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert!(config.db_path.is_none());
        assert_eq!(config.embedding_dimensions, DEFAULT_EMBEDDING_DIMENSIONS);
    }
}
