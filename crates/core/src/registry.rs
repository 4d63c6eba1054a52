//! Capability Registry: the closed set of things the assistant can do.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::capability::{CapabilityId, DelegationTarget};
use crate::domain::filter::{Collection, Field};
use crate::errors::OrchestrationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectRule {
    None,
    /// Taken only from an explicit reference.
    Optional,
    /// Defaults to the single entity of the previous result.
    Implicit,
    /// Like `Implicit`, but the request cannot run without one.
    Required,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParameterSchema {
    pub requires_query: bool,
    pub default_query: Option<&'static str>,
    pub allowed_fields: &'static [Field],
    pub subject: SubjectRule,
}

impl ParameterSchema {
    pub fn allows(&self, field: Field) -> bool {
        self.allowed_fields.contains(&field)
    }

    pub fn requires_subject(&self) -> bool {
        self.subject == SubjectRule::Required
    }

    pub fn defaults_subject(&self) -> bool {
        matches!(self.subject, SubjectRule::Implicit | SubjectRule::Required)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CapabilityDescriptor {
    pub id: CapabilityId,
    pub target: DelegationTarget,
    pub description: &'static str,
    pub schema: ParameterSchema,
}

impl CapabilityDescriptor {
    /// Search collection backing this capability, if it is a search.
    pub fn collection(&self) -> Option<Collection> {
        match self.target {
            DelegationTarget::SearchItems => Some(Collection::Items),
            DelegationTarget::SearchReviews => Some(Collection::Reviews),
            _ => None,
        }
    }
}

const ITEM_FIELDS: &[Field] = &[
    Field::Price,
    Field::Rating,
    Field::RatingCount,
    Field::Category,
    Field::Brand,
    Field::ParentAsin,
];
const REVIEW_FIELDS: &[Field] = &[Field::Rating, Field::HelpfulVotes, Field::ParentAsin];

fn standard_descriptors() -> Vec<CapabilityDescriptor> {
    vec![
        CapabilityDescriptor {
            id: CapabilityId::SearchItems,
            target: DelegationTarget::SearchItems,
            description: "Find products matching a description, optionally filtered by price, \
                          rating, number of ratings, category or brand.",
            schema: ParameterSchema {
                requires_query: true,
                default_query: None,
                allowed_fields: ITEM_FIELDS,
                subject: SubjectRule::Optional,
            },
        },
        CapabilityDescriptor {
            id: CapabilityId::SearchReviews,
            target: DelegationTarget::SearchReviews,
            description: "Find customer reviews, optionally for one product and filtered by \
                          star rating or helpful votes.",
            schema: ParameterSchema {
                requires_query: false,
                default_query: Some("reviews"),
                allowed_fields: REVIEW_FIELDS,
                subject: SubjectRule::Implicit,
            },
        },
        CapabilityDescriptor {
            id: CapabilityId::SummarizeReviews,
            target: DelegationTarget::Summarize,
            description: "Summarize the pros and cons from the reviews of one product.",
            schema: ParameterSchema {
                requires_query: false,
                default_query: None,
                allowed_fields: &[],
                subject: SubjectRule::Required,
            },
        },
        CapabilityDescriptor {
            id: CapabilityId::AnalyticalQuery,
            target: DelegationTarget::AnalyticalQuery,
            description: "Answer counting, ranking or aggregate questions over the catalog \
                          with a read-only SQL query.",
            schema: ParameterSchema {
                requires_query: true,
                default_query: None,
                allowed_fields: &[],
                subject: SubjectRule::None,
            },
        },
        CapabilityDescriptor {
            id: CapabilityId::ResearchIdeas,
            target: DelegationTarget::Research,
            description: "Brainstorm product search ideas for an open-ended need such as a gift.",
            schema: ParameterSchema {
                requires_query: true,
                default_query: None,
                allowed_fields: &[],
                subject: SubjectRule::None,
            },
        },
        CapabilityDescriptor {
            id: CapabilityId::Clarify,
            target: DelegationTarget::Clarification,
            description: "Ask the shopper a follow-up question when the request is unclear.",
            schema: ParameterSchema {
                requires_query: true,
                default_query: None,
                allowed_fields: &[],
                subject: SubjectRule::None,
            },
        },
    ]
}

/// Read-only after construction.
#[derive(Clone, Debug)]
pub struct CapabilityRegistry {
    descriptors: BTreeMap<CapabilityId, CapabilityDescriptor>,
}

impl CapabilityRegistry {
    pub fn standard() -> Self {
        Self::from_descriptors(standard_descriptors())
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = CapabilityDescriptor>) -> Self {
        Self {
            descriptors: descriptors
                .into_iter()
                .map(|descriptor| (descriptor.id, descriptor))
                .collect(),
        }
    }

    /// Standard registry minus the given capabilities.
    pub fn without(ids: &[CapabilityId]) -> Self {
        Self::from_descriptors(
            standard_descriptors().into_iter().filter(|descriptor| !ids.contains(&descriptor.id)),
        )
    }

    pub fn lookup(&self, capability_id: &str) -> Result<&CapabilityDescriptor, OrchestrationError> {
        capability_id
            .parse::<CapabilityId>()
            .ok()
            .and_then(|id| self.descriptors.get(&id))
            .ok_or_else(|| OrchestrationError::UnknownCapability(capability_id.trim().to_string()))
    }

    pub fn get(&self, id: CapabilityId) -> Option<&CapabilityDescriptor> {
        self.descriptors.get(&id)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CapabilityDescriptor> {
        self.descriptors.values()
    }

    pub fn has_clarification(&self) -> bool {
        self.descriptors.contains_key(&CapabilityId::Clarify)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
