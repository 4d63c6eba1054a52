use std::cmp::Ordering;
use std::collections::BTreeSet;

use async_trait::async_trait;
use shopper_core::collaborators::{SearchBackend, SearchHits};
use shopper_core::domain::filter::{Collection, FilterSet};
use shopper_core::domain::result::{Item, Review};
use shopper_core::errors::CollaboratorError;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "the", "for", "of", "with", "to", "in", "on", "me", "find", "show", "some",
    "any", "reviews", "review", "item", "items", "product", "products",
];

/// Search over records held in memory. Filters are applied exactly; the free-text
/// query ranks by token overlap.
#[derive(Clone, Debug, Default)]
pub struct InMemorySearchBackend {
    items: Vec<Item>,
    reviews: Vec<Review>,
}

impl InMemorySearchBackend {
    pub fn new(items: Vec<Item>, reviews: Vec<Review>) -> Self {
        Self { items, reviews }
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn review_count(&self) -> usize {
        self.reviews.len()
    }
}

#[async_trait]
impl SearchBackend for InMemorySearchBackend {
    async fn search(
        &self,
        collection: Collection,
        filters: &FilterSet,
        query: &str,
        max_results: usize,
    ) -> Result<SearchHits, CollaboratorError> {
        if query.trim().is_empty() {
            return Err(CollaboratorError::Rejected("query must be a non-empty string".into()));
        }
        let terms = terms(query);

        match collection {
            Collection::Items => {
                let mut scored: Vec<(usize, &Item)> = self
                    .items
                    .iter()
                    .filter(|item| filters.matches(*item))
                    .map(|item| (overlap(&terms, &item_text(item)), item))
                    .filter(|(score, _)| terms.is_empty() || *score > 0)
                    .collect();
                scored.sort_by(|(left_score, left), (right_score, right)| {
                    right_score
                        .cmp(left_score)
                        .then_with(|| descending(left.average_rating, right.average_rating))
                        .then_with(|| right.rating_count.cmp(&left.rating_count))
                });
                Ok(SearchHits::Items(
                    scored.into_iter().take(max_results).map(|(_, item)| item.clone()).collect(),
                ))
            }
            Collection::Reviews => {
                let mut scored: Vec<(usize, &Review)> = self
                    .reviews
                    .iter()
                    .filter(|review| filters.matches(*review))
                    .map(|review| {
                        (overlap(&terms, &format!("{} {}", review.title, review.text)), review)
                    })
                    .collect();
                scored.sort_by(|(left_score, left), (right_score, right)| {
                    right_score
                        .cmp(left_score)
                        .then_with(|| right.helpful_votes.cmp(&left.helpful_votes))
                        .then_with(|| right.timestamp.cmp(&left.timestamp))
                });
                Ok(SearchHits::Reviews(
                    scored.into_iter().take(max_results).map(|(_, review)| review.clone()).collect(),
                ))
            }
        }
    }
}

fn descending(left: Option<f64>, right: Option<f64>) -> Ordering {
    right.unwrap_or(0.0).partial_cmp(&left.unwrap_or(0.0)).unwrap_or(Ordering::Equal)
}

fn item_text(item: &Item) -> String {
    let mut text = item.title.clone();
    for part in [&item.category, &item.brand, &item.description].into_iter().flatten() {
        text.push(' ');
        text.push_str(part);
    }
    for feature in &item.features {
        text.push(' ');
        text.push_str(feature);
    }
    text
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|character: char| !character.is_alphanumeric())
        .map(|word| word.to_lowercase())
        .filter(|word| word.len() > 1 && !STOP_WORDS.contains(&word.as_str()))
        .map(|word| stem(&word))
        .collect()
}

fn stem(word: &str) -> String {
    for suffix in ["es", "s"] {
        if let Some(stripped) = word.strip_suffix(suffix) {
            if stripped.len() > 2 {
                return stripped.to_string();
            }
        }
    }
    word.to_string()
}

fn overlap(terms: &BTreeSet<String>, text: &str) -> usize {
    let document = self::terms(text);
    terms.iter().filter(|term| document.contains(*term)).count()
}

#[cfg(test)]
mod tests {
    use shopper_core::collaborators::{SearchBackend, SearchHits};
    use shopper_core::domain::filter::{Collection, Constraint, Field, FilterSet, Operator};
    use shopper_core::domain::result::{EntityId, Item, Review};

    use super::InMemorySearchBackend;

    fn item(id: &str, title: &str, category: &str, price: f64, rating: f64) -> Item {
        Item {
            id: EntityId::new(id),
            title: title.to_string(),
            category: Some(category.to_string()),
            price: Some(price),
            average_rating: Some(rating),
            rating_count: Some(100),
            ..Item::default()
        }
    }

    fn review(id: &str, item: &str, rating: f64, votes: u64) -> Review {
        Review {
            id: EntityId::new(id),
            item_id: EntityId::new(item),
            rating,
            title: format!("Review {id}"),
            text: "Fits as expected".to_string(),
            helpful_votes: votes,
            ..Review::default()
        }
    }

    fn backend() -> InMemorySearchBackend {
        InMemorySearchBackend::new(
            vec![
                item("S1", "Slide Sandal", "Shoes", 25.0, 4.1),
                item("S2", "Leather Sandals", "Shoes", 80.0, 4.8),
                item("W1", "One-piece Swimsuit", "Swimwear", 40.0, 4.4),
            ],
            vec![
                review("R1", "S1", 1.0, 3),
                review("R2", "S1", 5.0, 9),
                review("R3", "S1", 2.0, 12),
                review("R4", "S2", 1.0, 40),
            ],
        )
    }

    #[tokio::test]
    async fn query_and_filters_narrow_items() {
        let filters = FilterSet::try_from_constraints(vec![Constraint::number(
            Field::Price,
            Operator::Lt,
            50.0,
        )])
        .expect("valid");

        let hits = backend().search(Collection::Items, &filters, "sandals", 10).await.expect("ok");
        let SearchHits::Items(items) = hits else { panic!("expected items") };
        assert_eq!(items.iter().map(|item| item.id.as_str()).collect::<Vec<_>>(), vec!["S1"]);
    }

    #[tokio::test]
    async fn reviews_for_one_item_rank_by_helpfulness() {
        let filters = FilterSet::try_from_constraints(vec![
            Constraint::text_eq(Field::ParentAsin, "S1"),
            Constraint::number(Field::Rating, Operator::Lte, 2.0),
        ])
        .expect("valid");

        let hits = backend().search(Collection::Reviews, &filters, "reviews", 10).await.expect("ok");
        let SearchHits::Reviews(reviews) = hits else { panic!("expected reviews") };
        assert_eq!(reviews.iter().map(|review| review.id.as_str()).collect::<Vec<_>>(), vec!["R3", "R1"]);
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        assert!(backend().search(Collection::Items, &FilterSet::empty(), "  ", 5).await.is_err());
    }
}
