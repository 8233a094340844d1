//! Backend selection from configuration.

use std::path::PathBuf;
use std::sync::Arc;

use nightbatch_batch::{BatchConfig, JobRepository, RepositoryError};
use nightbatch_cardops::{CardStore, StoreError};
use thiserror::Error;
use tracing::info;

use crate::json::{JsonFileCardStore, JsonFileJobRepository};
use crate::postgres::{PostgresCardStore, PostgresJobRepository};

#[derive(Debug, Error)]
pub enum StoresError {
    #[error("metadata store: {0}")]
    Repository(#[from] RepositoryError),

    #[error("card store: {0}")]
    Cards(#[from] StoreError),
}

/// The two stores a run needs.
pub struct Stores {
    pub repository: Arc<dyn JobRepository>,
    pub cards: Arc<dyn CardStore>,
}

impl Stores {
    /// Postgres when a database URL is configured, JSON files otherwise.
    pub fn open(config: &BatchConfig) -> Result<Self, StoresError> {
        match &config.database_url {
            Some(url) => {
                let repository = PostgresJobRepository::connect(url, config.io_timeout())?;
                repository.ensure_schema()?;
                let cards = PostgresCardStore::connect(url, config.io_timeout())?;
                cards.ensure_schema()?;
                info!(backend = "postgres", "stores open");
                Ok(Self {
                    repository: Arc::new(repository),
                    cards: Arc::new(cards),
                })
            }
            None => {
                let repository = JsonFileJobRepository::open(&config.metadata_path)?;
                let cards_path = card_file(config);
                let cards = JsonFileCardStore::open(&cards_path)?;
                info!(
                    backend = "json",
                    metadata = %config.metadata_path.display(),
                    cards = %cards_path.display(),
                    "stores open"
                );
                Ok(Self {
                    repository: Arc::new(repository),
                    cards: Arc::new(cards),
                })
            }
        }
    }
}

/// The card file sits next to the metadata file.
pub fn card_file(config: &BatchConfig) -> PathBuf {
    config.metadata_path.with_file_name("nightbatch-cards.json")
}
