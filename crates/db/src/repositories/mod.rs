use async_trait::async_trait;
use thiserror::Error;

use shopper_core::domain::result::{EntityId, Item, Review};

pub mod catalog;

pub use catalog::SqlCatalogRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Item and review records backing the local search and analytics stores.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn save_item(&self, item: &Item) -> Result<(), RepositoryError>;
    async fn save_review(&self, review: &Review) -> Result<(), RepositoryError>;
    async fn find_item(&self, id: &EntityId) -> Result<Option<Item>, RepositoryError>;
    async fn list_items(&self) -> Result<Vec<Item>, RepositoryError>;
    async fn list_reviews(&self) -> Result<Vec<Review>, RepositoryError>;
}
