//! Metadata store and query compilers for Tracklab.
//!
//! This crate provides the control-plane data model:
//! - Experiments, runs, params, tags, metric time series and their
//!   latest-value summaries
//! - The dense run row-number scheme used for dashboard paging
//! - The tracking-API filter compiler and the dashboard expression compiler
//! - Dashboard/app records
//! - A table-copy importer between stores

pub mod error;
pub mod import;
pub mod models;
pub mod postgres;
pub mod query;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use import::Importer;
pub use postgres::PostgresStore;
pub use store::{MetadataStore, SqliteStore};

use std::sync::Arc;
use tracklab_core::config::MetadataConfig;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            busy_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *busy_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            max_connections,
            statement_timeout_ms,
        } => {
            let store =
                PostgresStore::from_url(url, max_connections.unwrap_or(10), *statement_timeout_ms)
                    .await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_config_sqlite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("metadata.db");
        let config = MetadataConfig::Sqlite {
            path: db_path.clone(),
            busy_timeout_secs: None,
        };

        let store = from_config(&config).await.unwrap();
        store.health_check().await.unwrap();
        assert!(db_path.exists());
    }
}
