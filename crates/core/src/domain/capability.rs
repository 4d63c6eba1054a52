use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::filter::FilterSet;
use crate::domain::result::EntityId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityId {
    SearchItems,
    SearchReviews,
    SummarizeReviews,
    AnalyticalQuery,
    ResearchIdeas,
    Clarify,
}

impl CapabilityId {
    pub const ALL: [CapabilityId; 6] = [
        CapabilityId::SearchItems,
        CapabilityId::SearchReviews,
        CapabilityId::SummarizeReviews,
        CapabilityId::AnalyticalQuery,
        CapabilityId::ResearchIdeas,
        CapabilityId::Clarify,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SearchItems => "search_items",
            Self::SearchReviews => "search_reviews",
            Self::SummarizeReviews => "summarize_reviews",
            Self::AnalyticalQuery => "analytical_query",
            Self::ResearchIdeas => "research_ideas",
            Self::Clarify => "clarify",
        }
    }

    /// Capabilities whose filters can be refined on a later turn.
    pub fn is_search(self) -> bool {
        matches!(self, Self::SearchItems | Self::SearchReviews)
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "search_items" | "item_search" => Ok(Self::SearchItems),
            "search_reviews" | "review_search" => Ok(Self::SearchReviews),
            "summarize_reviews" | "summarize" | "summarise_reviews" => Ok(Self::SummarizeReviews),
            "analytical_query" | "analytics" | "sql" => Ok(Self::AnalyticalQuery),
            "research_ideas" | "research" => Ok(Self::ResearchIdeas),
            "clarify" | "clarification" => Ok(Self::Clarify),
            _ => Err(value.trim().to_string()),
        }
    }
}

/// Kind of collaborator a capability delegates to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationTarget {
    SearchItems,
    SearchReviews,
    Summarize,
    AnalyticalQuery,
    Research,
    Clarification,
}

/// Pointer from a request into data it consumes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum ContextRef {
    /// Output of an earlier request emitted in the same turn.
    PriorStep(usize),
    /// Entity from the previous turn's result.
    Entity(EntityId),
}

/// One routed unit of work. Lives only for the turn that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub step: usize,
    pub capability: CapabilityId,
    pub filters: FilterSet,
    pub query: Option<String>,
    pub context_refs: Vec<ContextRef>,
}

impl CapabilityRequest {
    pub fn new(step: usize, capability: CapabilityId) -> Self {
        Self { step, capability, filters: FilterSet::empty(), query: None, context_refs: Vec::new() }
    }

    pub fn clarification(question: impl Into<String>) -> Self {
        Self { query: Some(question.into()), ..Self::new(0, CapabilityId::Clarify) }
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_ref(mut self, reference: ContextRef) -> Self {
        self.context_refs.push(reference);
        self
    }

    pub fn is_clarification(&self) -> bool {
        self.capability == CapabilityId::Clarify
    }

    /// Earlier steps of the same turn this request waits on.
    pub fn depends_on(&self) -> impl Iterator<Item = usize> + '_ {
        self.context_refs.iter().filter_map(|reference| match reference {
            ContextRef::PriorStep(step) => Some(*step),
            ContextRef::Entity(_) => None,
        })
    }

    /// Entity this request is about, when it targets one from the previous result.
    pub fn subject(&self) -> Option<&EntityId> {
        self.context_refs.iter().find_map(|reference| match reference {
            ContextRef::Entity(entity) => Some(entity),
            ContextRef::PriorStep(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CapabilityId, CapabilityRequest, ContextRef};
    use crate::domain::result::EntityId;

    #[test]
    fn parses_ids_and_aliases() {
        assert_eq!("search_items".parse::<CapabilityId>(), Ok(CapabilityId::SearchItems));
        assert_eq!("Summarize".parse::<CapabilityId>(), Ok(CapabilityId::SummarizeReviews));
        assert_eq!("research-ideas".parse::<CapabilityId>(), Ok(CapabilityId::ResearchIdeas));
        assert_eq!("teleport".parse::<CapabilityId>(), Err("teleport".to_string()));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for id in CapabilityId::ALL {
            assert_eq!(id.to_string().parse::<CapabilityId>(), Ok(id));
        }
    }

    #[test]
    fn splits_step_dependencies_from_entity_subject() {
        let request = CapabilityRequest::new(2, CapabilityId::SummarizeReviews)
            .with_ref(ContextRef::PriorStep(0))
            .with_ref(ContextRef::Entity(EntityId::new("B0C1")))
            .with_ref(ContextRef::PriorStep(1));

        assert_eq!(request.depends_on().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(request.subject().map(EntityId::as_str), Some("B0C1"));
        assert!(!request.is_clarification());
        assert!(CapabilityRequest::clarification("Which one?").is_clarification());
    }
}
