//! Conversation State for a single shopping session.
//!
//! State is passed into each turn and handed back on commit; nothing here is shared
//! between sessions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::capability::CapabilityId;
use crate::domain::filter::FilterSet;
use crate::domain::result::{CapabilityResult, EntityId};
use crate::errors::OrchestrationError;

pub const DEFAULT_MAX_TURN_HISTORY: usize = 50;

const ORDINAL_WORDS: &[(&str, usize)] = &[
    ("first", 1),
    ("second", 2),
    ("third", 3),
    ("fourth", 4),
    ("fifth", 5),
    ("sixth", 6),
    ("seventh", 7),
    ("eighth", 8),
    ("ninth", 9),
    ("tenth", 10),
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
];

const DEMONSTRATIVES: &[&str] = &[
    "it",
    "this",
    "that",
    "this one",
    "that one",
    "the one",
    "that item",
    "this item",
    "that product",
    "this product",
    "the item",
    "the product",
];

const FILLER_WORDS: &[&str] = &["the", "one", "item", "product", "for", "of", "about", "a"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub user_text: String,
    pub response_summary: String,
}

impl TurnRecord {
    pub fn new(user_text: impl Into<String>, response_summary: impl Into<String>) -> Self {
        Self { user_text: user_text.into(), response_summary: response_summary.into() }
    }
}

/// Filters last applied by a search capability, kept for refinement turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveSearch {
    pub capability: CapabilityId,
    pub filters: FilterSet,
    /// Free-text query the search ran with, reused when a refinement names none.
    #[serde(default)]
    pub query: Option<String>,
    /// Item the search was scoped to; refinements stay on it.
    #[serde(default)]
    pub subject: Option<EntityId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    session_id: String,
    turn_history: Vec<TurnRecord>,
    last_result: Option<CapabilityResult>,
    active_filters: FilterSet,
    active_capability: Option<CapabilityId>,
    #[serde(default)]
    active_query: Option<String>,
    #[serde(default)]
    active_subject: Option<EntityId>,
    max_turn_history: usize,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_MAX_TURN_HISTORY)
    }

    pub fn with_history_limit(max_turn_history: usize) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            turn_history: Vec::new(),
            last_result: None,
            active_filters: FilterSet::empty(),
            active_capability: None,
            active_query: None,
            active_subject: None,
            max_turn_history: max_turn_history.max(1),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn turn_history(&self) -> &[TurnRecord] {
        &self.turn_history
    }

    pub fn turn_count(&self) -> usize {
        self.turn_history.len()
    }

    pub fn last_result(&self) -> Option<&CapabilityResult> {
        self.last_result.as_ref()
    }

    pub fn active_filters(&self) -> &FilterSet {
        &self.active_filters
    }

    pub fn active_capability(&self) -> Option<CapabilityId> {
        self.active_capability
    }

    pub fn active_query(&self) -> Option<&str> {
        self.active_query.as_deref()
    }

    pub fn active_subject(&self) -> Option<&EntityId> {
        self.active_subject.as_ref()
    }

    /// Commits a finished turn. `None` keeps the previous result or filters.
    pub fn update(
        &mut self,
        turn: TurnRecord,
        new_result: Option<CapabilityResult>,
        new_search: Option<ActiveSearch>,
    ) {
        self.turn_history.push(turn);
        if self.turn_history.len() > self.max_turn_history {
            let overflow = self.turn_history.len() - self.max_turn_history;
            self.turn_history.drain(..overflow);
        }
        if let Some(result) = new_result {
            self.last_result = Some(result);
        }
        if let Some(search) = new_search {
            self.active_capability = Some(search.capability);
            self.active_filters = search.filters;
            self.active_query = search.query;
            self.active_subject = search.subject;
        }
    }

    /// Maps a mention like "the second one" onto an entity from `last_result`.
    pub fn resolve_reference(&self, mention: &str) -> Result<EntityId, OrchestrationError> {
        let unresolved = || OrchestrationError::UnresolvedReference { mention: mention.to_string() };
        let result = self.last_result.as_ref().ok_or_else(unresolved)?;
        let ids = result.entity_ids();
        if ids.is_empty() {
            return Err(unresolved());
        }

        let normalized = normalize_mention(mention);
        if let Some(id) = ids.iter().find(|id| id.as_str().eq_ignore_ascii_case(&normalized)) {
            return Ok(id.clone());
        }

        if let Some(position) = ordinal_position(&normalized, ids.len()) {
            return ids.get(position).cloned().ok_or_else(unresolved);
        }

        if DEMONSTRATIVES.contains(&normalized.as_str()) {
            return match ids.as_slice() {
                [only] => Ok(only.clone()),
                _ => Err(unresolved()),
            };
        }

        let needle = strip_filler(&normalized);
        if !needle.is_empty() {
            let mut matching = ids.iter().filter(|id| {
                result
                    .entity_label(id)
                    .is_some_and(|label| label.to_ascii_lowercase().contains(&needle))
            });
            if let (Some(found), None) = (matching.next(), matching.next()) {
                return Ok(found.clone());
            }
        }

        Err(unresolved())
    }
}

fn normalize_mention(mention: &str) -> String {
    mention
        .trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .map(|word| word.trim_matches(|character: char| matches!(character, '.' | ',' | '?' | '!' | '"')))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Zero-based position named by the mention; `len` resolves "last".
/// Positions past the end are returned as-is so the caller can reject them.
fn ordinal_position(normalized: &str, len: usize) -> Option<usize> {
    let words: Vec<&str> = normalized.split_whitespace().collect();
    for (index, word) in words.iter().enumerate() {
        if matches!(*word, "last" | "final" | "bottom") {
            return Some(len.saturating_sub(1));
        }
        if let Some(rank) = word.strip_prefix('#').and_then(|digits| digits.parse::<usize>().ok()) {
            return rank.checked_sub(1);
        }
        if let Some(rank) = numeric_ordinal(word) {
            return rank.checked_sub(1);
        }
        if let Some((_, rank)) = ORDINAL_WORDS.iter().take(10).find(|(name, _)| name == word) {
            return Some(rank - 1);
        }
        let follows_marker = index > 0 && matches!(words[index - 1], "number" | "no" | "item" | "option");
        if follows_marker {
            if let Ok(rank) = word.parse::<usize>() {
                return rank.checked_sub(1);
            }
            if let Some((_, rank)) = ORDINAL_WORDS.iter().find(|(name, _)| name == word) {
                return Some(rank - 1);
            }
        }
    }
    None
}

fn numeric_ordinal(word: &str) -> Option<usize> {
    let digits = ["st", "nd", "rd", "th"].iter().find_map(|suffix| word.strip_suffix(suffix))?;
    digits.parse().ok()
}

fn strip_filler(normalized: &str) -> String {
    normalized
        .split_whitespace()
        .filter(|word| !FILLER_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::{ActiveSearch, ConversationState, TurnRecord};
    use crate::domain::capability::CapabilityId;
    use crate::domain::filter::{Constraint, Field, FilterSet, Operator};
    use crate::domain::result::{CapabilityResult, EntityId, Item};
    use crate::errors::OrchestrationError;

    fn items(ids: &[(&str, &str)]) -> CapabilityResult {
        CapabilityResult::ItemList(
            ids.iter()
                .map(|(id, title)| Item {
                    id: EntityId::new(*id),
                    title: title.to_string(),
                    ..Item::default()
                })
                .collect(),
        )
    }

    fn state_with(result: CapabilityResult) -> ConversationState {
        let mut state = ConversationState::new();
        state.update(TurnRecord::new("find shoes", "Found shoes"), Some(result), None);
        state
    }

    #[test]
    fn ordinal_mentions_resolve_by_position() {
        let state = state_with(items(&[("A", "Trail runner"), ("B", "Road racer"), ("C", "Sandal")]));

        assert_eq!(state.resolve_reference("the second one"), Ok(EntityId::new("B")));
        assert_eq!(state.resolve_reference("the 3rd"), Ok(EntityId::new("C")));
        assert_eq!(state.resolve_reference("#1"), Ok(EntityId::new("A")));
        assert_eq!(state.resolve_reference("number two"), Ok(EntityId::new("B")));
        assert_eq!(state.resolve_reference("the last one"), Ok(EntityId::new("C")));
    }

    #[test]
    fn out_of_range_ordinal_is_unresolved() {
        let state = state_with(items(&[("A", "one"), ("B", "two"), ("C", "three")]));
        assert_eq!(
            state.resolve_reference("the fifth one"),
            Err(OrchestrationError::UnresolvedReference { mention: "the fifth one".to_string() })
        );
    }

    #[test]
    fn demonstrative_needs_a_single_entity() {
        let single = state_with(items(&[("A", "Kettle")]));
        assert_eq!(single.resolve_reference("that one"), Ok(EntityId::new("A")));

        let several = state_with(items(&[("A", "Kettle"), ("B", "Toaster")]));
        assert!(several.resolve_reference("that one").is_err());
    }

    #[test]
    fn unique_title_fragment_resolves() {
        let state = state_with(items(&[("A", "Speedo Swimsuit"), ("B", "Teva Sandal")]));
        assert_eq!(state.resolve_reference("the Teva one"), Ok(EntityId::new("B")));
        assert_eq!(state.resolve_reference("b"), Ok(EntityId::new("B")));
    }

    #[test]
    fn nothing_retrieved_means_unresolved() {
        let state = ConversationState::new();
        assert!(matches!(
            state.resolve_reference("the first one"),
            Err(OrchestrationError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn update_keeps_previous_values_when_absent() {
        let mut state = state_with(items(&[("A", "Kettle")]));
        let filters =
            FilterSet::try_from_constraints(vec![Constraint::number(Field::Price, Operator::Lt, 50.0)])
                .expect("valid");
        state.update(
            TurnRecord::new("under $50", "Found 1 item"),
            None,
            Some(ActiveSearch {
                capability: CapabilityId::SearchItems,
                filters: filters.clone(),
                query: Some("sandals".to_string()),
                subject: None,
            }),
        );

        assert_eq!(state.turn_count(), 2);
        assert_eq!(state.last_result().map(CapabilityResult::len), Some(1));
        assert_eq!(state.active_filters(), &filters);
        assert_eq!(state.active_capability(), Some(CapabilityId::SearchItems));
    }

    #[test]
    fn history_is_bounded() {
        let mut state = ConversationState::with_history_limit(2);
        for turn in 0..5 {
            state.update(TurnRecord::new(format!("turn {turn}"), "ok"), None, None);
        }
        assert_eq!(state.turn_count(), 2);
        assert_eq!(state.turn_history()[0].user_text, "turn 3");
    }
}
