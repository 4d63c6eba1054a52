use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::filter::{Field, Filterable};

/// Identifier of a retrieved entity (item ASIN, review id, idea slot).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "parent_asin")]
    pub id: EntityId,
    pub title: String,
    pub price: Option<f64>,
    pub average_rating: Option<f64>,
    pub rating_count: Option<u64>,
    pub category: Option<String>,
    pub brand: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl Filterable for Item {
    fn numeric(&self, field: Field) -> Option<f64> {
        match field {
            Field::Price => self.price,
            Field::Rating => self.average_rating,
            Field::RatingCount => self.rating_count.map(|count| count as f64),
            _ => None,
        }
    }

    fn categorical(&self, field: Field) -> Option<&str> {
        match field {
            Field::Category => self.category.as_deref(),
            Field::Brand => self.brand.as_deref(),
            Field::ParentAsin => Some(self.id.as_str()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(rename = "review_id")]
    pub id: EntityId,
    #[serde(rename = "parent_asin")]
    pub item_id: EntityId,
    pub rating: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub helpful_votes: u64,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verified_purchase: bool,
}

impl Filterable for Review {
    fn numeric(&self, field: Field) -> Option<f64> {
        match field {
            Field::Rating => Some(self.rating),
            Field::HelpfulVotes => Some(self.helpful_votes as f64),
            _ => None,
        }
    }

    fn categorical(&self, field: Field) -> Option<&str> {
        match field {
            Field::ParentAsin => Some(self.item_id.as_str()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub subject: Option<EntityId>,
    pub review_count: usize,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    pub overall: String,
}

impl ReviewSummary {
    pub fn no_reviews(subject: Option<EntityId>) -> Self {
        Self {
            subject,
            review_count: 0,
            pros: Vec::new(),
            cons: Vec::new(),
            overall: "No reviews are available yet.".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRows {
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableRows {
    fn id_column(&self) -> Option<usize> {
        ["parent_asin", "asin"].iter().find_map(|wanted| {
            self.columns.iter().position(|column| column.eq_ignore_ascii_case(wanted))
        })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    pub id: EntityId,
    pub query: String,
}

impl Idea {
    /// Ideas are addressed by their 1-based slot in the list.
    pub fn numbered(queries: impl IntoIterator<Item = String>) -> Vec<Idea> {
        queries
            .into_iter()
            .enumerate()
            .map(|(index, query)| Idea { id: EntityId(format!("idea-{}", index + 1)), query })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CapabilityResult {
    ItemList(Vec<Item>),
    ReviewList(Vec<Review>),
    Summary(ReviewSummary),
    TableRows(TableRows),
    IdeaList(Vec<Idea>),
}

impl CapabilityResult {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ItemList(_) => "item_list",
            Self::ReviewList(_) => "review_list",
            Self::Summary(_) => "summary",
            Self::TableRows(_) => "table_rows",
            Self::IdeaList(_) => "idea_list",
        }
    }

    /// Identifiers in result order; the basis for ordinal references.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        match self {
            Self::ItemList(items) => items.iter().map(|item| item.id.clone()).collect(),
            Self::ReviewList(reviews) => reviews.iter().map(|review| review.id.clone()).collect(),
            Self::Summary(summary) => summary.subject.iter().cloned().collect(),
            Self::TableRows(table) => match table.id_column() {
                Some(index) => table
                    .rows
                    .iter()
                    .filter_map(|row| row.get(index))
                    .filter_map(value_as_id)
                    .collect(),
                None => Vec::new(),
            },
            Self::IdeaList(ideas) => ideas.iter().map(|idea| idea.id.clone()).collect(),
        }
    }

    /// Human-readable name for an entity, usable as a follow-up search query.
    pub fn entity_label(&self, id: &EntityId) -> Option<String> {
        match self {
            Self::ItemList(items) => {
                items.iter().find(|item| &item.id == id).map(|item| item.title.clone())
            }
            Self::ReviewList(reviews) => reviews
                .iter()
                .find(|review| &review.id == id)
                .map(|review| review.title.clone())
                .filter(|title| !title.is_empty()),
            Self::Summary(_) => None,
            Self::TableRows(table) => {
                let id_column = table.id_column()?;
                let title_column = table.column("title")?;
                table
                    .rows
                    .iter()
                    .find(|row| {
                        row.get(id_column).and_then(value_as_id).as_ref() == Some(id)
                    })
                    .and_then(|row| row.get(title_column))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }
            Self::IdeaList(ideas) => {
                ideas.iter().find(|idea| &idea.id == id).map(|idea| idea.query.clone())
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::ItemList(items) => items.len(),
            Self::ReviewList(reviews) => reviews.len(),
            Self::Summary(_) => 1,
            Self::TableRows(table) => table.rows.len(),
            Self::IdeaList(ideas) => ideas.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items(&self) -> Option<&[Item]> {
        match self {
            Self::ItemList(items) => Some(items),
            _ => None,
        }
    }

    pub fn review_texts(&self) -> Vec<String> {
        match self {
            Self::ReviewList(reviews) => reviews
                .iter()
                .map(|review| match review.title.trim() {
                    "" => review.text.trim().to_string(),
                    title => format!("{title}: {}", review.text.trim()),
                })
                .filter(|text| !text.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Appends a result of the same list variant, dropping repeated entities.
    /// Returns `other` back when the variants cannot be combined.
    pub fn concat(&mut self, other: CapabilityResult) -> Result<(), CapabilityResult> {
        match (self, other) {
            (Self::ItemList(items), Self::ItemList(more)) => {
                for item in more {
                    if !items.iter().any(|existing| existing.id == item.id) {
                        items.push(item);
                    }
                }
                Ok(())
            }
            (Self::ReviewList(reviews), Self::ReviewList(more)) => {
                for review in more {
                    if !reviews.iter().any(|existing| existing.id == review.id) {
                        reviews.push(review);
                    }
                }
                Ok(())
            }
            (_, other) => Err(other),
        }
    }
}

fn value_as_id(value: &Value) -> Option<EntityId> {
    match value {
        Value::String(text) if !text.is_empty() => Some(EntityId(text.clone())),
        Value::Number(number) => Some(EntityId(number.to_string())),
        _ => None,
    }
}
