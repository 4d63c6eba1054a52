use chrono::{TimeZone, Utc};
use sqlx::Row;

use shopper_core::domain::result::{EntityId, Item, Review};

use super::{CatalogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const ITEM_COLUMNS: &str = "parent_asin, title, main_category, store, price, average_rating, rating_number, description, features";
const REVIEW_COLUMNS: &str = "review_id, parent_asin, rating, title, text, helpful_vote, review_timestamp, verified_purchase";

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<Item, RepositoryError> {
    let features_json: String = decode(row.try_get("features"))?;
    let features: Vec<String> = serde_json::from_str(&features_json)
        .map_err(|e| RepositoryError::Decode(format!("features: {e}")))?;
    let rating_number: Option<i64> = decode(row.try_get("rating_number"))?;

    Ok(Item {
        id: EntityId(decode(row.try_get("parent_asin"))?),
        title: decode(row.try_get("title"))?,
        price: decode(row.try_get("price"))?,
        average_rating: decode(row.try_get("average_rating"))?,
        rating_count: rating_number.and_then(|count| u64::try_from(count).ok()),
        category: decode(row.try_get("main_category"))?,
        brand: decode(row.try_get("store"))?,
        description: decode(row.try_get("description"))?,
        features,
    })
}

fn row_to_review(row: &sqlx::sqlite::SqliteRow) -> Result<Review, RepositoryError> {
    let helpful_vote: i64 = decode(row.try_get("helpful_vote"))?;
    let timestamp_ms: Option<i64> = decode(row.try_get("review_timestamp"))?;
    let verified: i64 = decode(row.try_get("verified_purchase"))?;

    Ok(Review {
        id: EntityId(decode(row.try_get("review_id"))?),
        item_id: EntityId(decode(row.try_get("parent_asin"))?),
        rating: decode(row.try_get("rating"))?,
        title: decode(row.try_get("title"))?,
        text: decode(row.try_get("text"))?,
        helpful_votes: u64::try_from(helpful_vote).unwrap_or_default(),
        timestamp: timestamp_ms.and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        verified_purchase: verified != 0,
    })
}

#[async_trait::async_trait]
impl CatalogRepository for SqlCatalogRepository {
    async fn save_item(&self, item: &Item) -> Result<(), RepositoryError> {
        let features = serde_json::to_string(&item.features)
            .map_err(|e| RepositoryError::Decode(format!("features: {e}")))?;
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ))
        .bind(item.id.as_str())
        .bind(&item.title)
        .bind(&item.category)
        .bind(&item.brand)
        .bind(item.price)
        .bind(item.average_rating)
        .bind(item.rating_count.and_then(|count| i64::try_from(count).ok()))
        .bind(&item.description)
        .bind(features)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_review(&self, review: &Review) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO reviews ({REVIEW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ))
        .bind(review.id.as_str())
        .bind(review.item_id.as_str())
        .bind(review.rating)
        .bind(&review.title)
        .bind(&review.text)
        .bind(i64::try_from(review.helpful_votes).unwrap_or(i64::MAX))
        .bind(review.timestamp.map(|at| at.timestamp_millis()))
        .bind(review.verified_purchase)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_item(&self, id: &EntityId) -> Result<Option<Item>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE parent_asin = ?1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn list_items(&self) -> Result<Vec<Item>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY parent_asin"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn list_reviews(&self) -> Result<Vec<Review>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews ORDER BY parent_asin, helpful_vote DESC, review_timestamp DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_review).collect()
    }
}
