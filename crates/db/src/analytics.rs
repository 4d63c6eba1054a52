//! Read-only SQL access to the catalog for analytical questions.

use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use shopper_core::collaborators::AnalyticalDatabase;
use shopper_core::domain::result::TableRows;
use shopper_core::errors::CollaboratorError;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use tracing::{debug, warn};

use crate::DbPool;

const SAMPLE_ROWS: u32 = 5;

#[derive(Clone)]
pub struct SqliteAnalytics {
    pool: DbPool,
}

impl SqliteAnalytics {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, sql: &str) -> Result<TableRows, CollaboratorError> {
        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        sqlx::query("PRAGMA query_only = ON").execute(&mut *conn).await.map_err(unavailable)?;
        let rows = sqlx::query(sql).fetch_all(&mut *conn).await;
        // No rows to read names from, so ask the prepared statement.
        let described = match &rows {
            Ok(rows) if rows.is_empty() => match (&mut *conn).describe(sql).await {
                Ok(describe) => {
                    describe.columns().iter().map(|column| column.name().to_string()).collect()
                }
                Err(error) => {
                    debug!(event_name = "analytics.describe_failed", error = %error, "no column names for empty result");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };
        if let Err(error) = sqlx::query("PRAGMA query_only = OFF").execute(&mut *conn).await {
            warn!(event_name = "analytics.reset_failed", error = %error, "could not leave query_only mode");
            conn.detach();
        }
        let rows = rows.map_err(|error| CollaboratorError::Query(error.to_string()))?;
        Ok(to_table(sql, described, &rows))
    }

    async fn table_names(&self) -> Result<Vec<String>, CollaboratorError> {
        sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)
    }
}

fn unavailable(error: sqlx::Error) -> CollaboratorError {
    CollaboratorError::Unavailable(error.to_string())
}

fn cell(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let storage = raw.type_info().name().to_ascii_uppercase();
    match storage.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(index).map(Value::from).unwrap_or(Value::Null),
        "REAL" | "NUMERIC" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => Value::String("<binary>".to_string()),
        _ => row.try_get::<String, _>(index).map(Value::String).unwrap_or(Value::Null),
    }
}

fn to_table(sql: &str, described: Vec<String>, rows: &[SqliteRow]) -> TableRows {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|column| column.name().to_string()).collect())
        .unwrap_or(described);
    let rows = rows
        .iter()
        .map(|row| (0..row.columns().len()).map(|index| cell(row, index)).collect())
        .collect();
    TableRows { sql: sql.to_string(), columns, rows }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl AnalyticalDatabase for SqliteAnalytics {
    async fn execute_query(&self, sql: &str) -> Result<TableRows, CollaboratorError> {
        debug!(event_name = "analytics.query", sql, "executing analytical query");
        self.fetch(sql).await
    }

    /// JSON object keyed by table: column names and types plus a few sample rows.
    async fn schema_context(&self) -> Result<String, CollaboratorError> {
        let mut tables = Map::new();
        for table in self.table_names().await? {
            let columns = sqlx::query(&format!("PRAGMA table_info({})", quote_identifier(&table)))
                .fetch_all(&self.pool)
                .await
                .map_err(unavailable)?
                .iter()
                .map(|row| {
                    let name: String = row.try_get("name").unwrap_or_default();
                    let kind: String = row.try_get("type").unwrap_or_default();
                    Value::Array(vec![Value::String(name), Value::String(kind)])
                })
                .collect::<Vec<_>>();

            let sample_sql =
                format!("SELECT * FROM {} LIMIT {SAMPLE_ROWS}", quote_identifier(&table));
            let samples = match self.fetch(&sample_sql).await {
                Ok(sample) => {
                    sample
                        .rows
                        .into_iter()
                        .map(|values| {
                            Value::Object(sample.columns.iter().cloned().zip(values).collect())
                        })
                        .collect()
                }
                Err(error) => {
                    warn!(event_name = "analytics.sample_failed", table = %table, error = %error, "could not sample table");
                    Vec::new()
                }
            };

            let mut entry = Map::new();
            entry.insert("table_schema".to_string(), Value::Array(columns));
            entry.insert("sample_values".to_string(), Value::Array(samples));
            tables.insert(table, Value::Object(entry));
        }

        serde_json::to_string_pretty(&Value::Object(tables))
            .map_err(|error| CollaboratorError::Malformed(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use shopper_core::collaborators::AnalyticalDatabase;
    use shopper_core::errors::CollaboratorError;

    use super::SqliteAnalytics;
    use crate::fixtures::DemoCatalog;
    use crate::migrations::run_pending;
    use crate::connect_with_settings;

    async fn seeded() -> SqliteAnalytics {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        DemoCatalog::load(&pool).await.expect("seed");
        SqliteAnalytics::new(pool)
    }

    #[tokio::test]
    async fn aggregate_query_returns_typed_cells() {
        let analytics = seeded().await;
        let table = analytics
            .execute_query(
                "SELECT main_category, COUNT(*) AS item_count, MAX(price) AS top_price
                 FROM items GROUP BY main_category ORDER BY main_category",
            )
            .await
            .expect("query");

        assert_eq!(table.columns, vec!["main_category", "item_count", "top_price"]);
        assert_eq!(table.rows[0], vec![json!("Home"), json!(1), json!(21.0)]);
        assert_eq!(table.rows[1][1], json!(3));
    }

    #[tokio::test]
    async fn empty_result_still_names_its_columns() {
        let analytics = seeded().await;
        let table = analytics
            .execute_query("SELECT parent_asin, price FROM items WHERE price > 1000")
            .await
            .expect("query");

        assert!(table.rows.is_empty());
        assert_eq!(table.columns, vec!["parent_asin", "price"]);
    }

    #[tokio::test]
    async fn writes_are_refused_and_connection_recovers() {
        let analytics = seeded().await;
        let error = analytics
            .execute_query("DELETE FROM reviews")
            .await
            .expect_err("query_only blocks writes");
        assert!(matches!(error, CollaboratorError::Query(_)));

        let table = analytics.execute_query("SELECT COUNT(*) AS n FROM reviews").await.expect("read");
        assert_eq!(table.rows, vec![vec![json!(9)]]);
    }

    #[tokio::test]
    async fn schema_context_lists_tables_with_samples() {
        let analytics = seeded().await;
        let context: Value =
            serde_json::from_str(&analytics.schema_context().await.expect("schema")).expect("json");

        let items = &context["items"];
        assert!(items["table_schema"]
            .as_array()
            .is_some_and(|columns| columns.iter().any(|column| column[0] == "parent_asin")));
        assert_eq!(items["sample_values"].as_array().map(Vec::len), Some(5));
        assert!(context.get("_sqlx_migrations").is_none());
    }
}
