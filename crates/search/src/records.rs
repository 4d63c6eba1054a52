//! Tolerant mapping from datastore documents to domain records.
//!
//! Catalog exports are loose: prices arrive as numbers, strings ("$12.99") or null,
//! descriptions as strings or lists, timestamps as epoch milliseconds.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use shopper_core::domain::result::{EntityId, Item, Review};

pub fn item_from_document(document: &Map<String, Value>) -> Option<Item> {
    let id = text(document, &["parent_asin", "asin", "id"])?;
    Some(Item {
        id: EntityId(id),
        title: text(document, &["title"]).unwrap_or_default(),
        price: number(document, &["price"]),
        average_rating: number(document, &["average_rating", "rating"]),
        rating_count: number(document, &["rating_number", "rating_count"])
            .filter(|count| *count >= 0.0)
            .map(|count| count.round() as u64),
        category: text(document, &["main_category", "category"]),
        brand: text(document, &["store", "brand"]),
        description: joined(document, "description"),
        features: list(document, "features"),
    })
}

pub fn review_from_document(document: &Map<String, Value>) -> Option<Review> {
    let item_id = text(document, &["parent_asin", "asin"])?;
    let timestamp = document.get("timestamp").and_then(timestamp);
    let id = text(document, &["review_id", "id"]).unwrap_or_else(|| {
        let author = text(document, &["user_id"]).unwrap_or_else(|| "anonymous".to_string());
        let millis = timestamp.map(|at| at.timestamp_millis()).unwrap_or_default();
        format!("{item_id}-{author}-{millis}")
    });

    Some(Review {
        id: EntityId(id),
        item_id: EntityId(item_id),
        rating: number(document, &["rating"])?,
        title: text(document, &["title"]).unwrap_or_default(),
        text: text(document, &["text", "body"]).unwrap_or_default(),
        helpful_votes: number(document, &["helpful_vote", "helpful_votes"])
            .filter(|votes| *votes >= 0.0)
            .map(|votes| votes.round() as u64)
            .unwrap_or_default(),
        timestamp,
        verified_purchase: document
            .get("verified_purchase")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn text(document: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match document.get(*key)? {
        Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    })
}

fn number(document: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match document.get(*key)? {
        Value::Number(value) => value.as_f64(),
        Value::String(value) => {
            value.trim().trim_start_matches('$').replace(',', "").parse::<f64>().ok()
        }
        _ => None,
    })
}

fn list(document: &Map<String, Value>, key: &str) -> Vec<String> {
    match document.get(key) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(value)) if !value.trim().is_empty() => vec![value.trim().to_string()],
        _ => Vec::new(),
    }
}

fn joined(document: &Map<String, Value>, key: &str) -> Option<String> {
    let parts = list(document, key);
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(millis) => Utc.timestamp_millis_opt(millis.as_i64()?).single(),
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|at| at.with_timezone(&Utc))
            .ok()
            .or_else(|| raw.parse::<i64>().ok().and_then(|millis| Utc.timestamp_millis_opt(millis).single())),
        _ => None,
    }
}
