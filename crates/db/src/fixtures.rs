use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Items the demo catalog guarantees, with the number of reviews attached to each.
const SEED_ITEMS: &[(&str, i64)] = &[
    ("B0SANDAL01", 3),
    ("B0SANDAL02", 2),
    ("B0SANDAL03", 0),
    ("B0SWIM0001", 2),
    ("B0SWIM0002", 1),
    ("B0SWIM0003", 0),
    ("B0TOWEL001", 1),
];

/// Deterministic catalog for local runs and end-to-end tests.
pub struct DemoCatalog;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub items_seeded: usize,
    pub reviews_seeded: usize,
}

#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

impl DemoCatalog {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_catalog.sql");

    /// Idempotent: rows are replaced by primary key.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            items_seeded: SEED_ITEMS.len(),
            reviews_seeded: SEED_ITEMS.iter().map(|(_, reviews)| *reviews as usize).sum(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (item_id, expected_reviews) in SEED_ITEMS {
            let exists: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM items WHERE parent_asin = ?1)")
                    .bind(item_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((format!("item {item_id}"), exists == 1));

            let reviews: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM reviews WHERE parent_asin = ?1")
                    .bind(item_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((format!("{item_id} review count"), reviews == *expected_reviews));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}
