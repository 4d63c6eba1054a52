//! Ports onto external collaborators: language model, search backend, analytical
//! database, summarizer, researcher. Adapters live in the agent, search and db crates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::filter::{Collection, FilterSet};
use crate::domain::result::{Item, Review, TableRows};
use crate::errors::CollaboratorError;
use crate::filters::RawConstraint;
use crate::registry::CapabilityRegistry;

/// Records returned by a search, typed by collection.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchHits {
    Items(Vec<Item>),
    Reviews(Vec<Review>),
}

impl SearchHits {
    pub fn len(&self) -> usize {
        match self {
            Self::Items(items) => items.len(),
            Self::Reviews(reviews) => reviews.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        collection: Collection,
        filters: &FilterSet,
        query: &str,
        max_results: usize,
    ) -> Result<SearchHits, CollaboratorError>;
}

#[async_trait]
pub trait AnalyticalDatabase: Send + Sync {
    /// Runs an already-guarded read-only statement. Failures map to
    /// [`CollaboratorError::Query`].
    async fn execute_query(&self, sql: &str) -> Result<TableRows, CollaboratorError>;

    /// Table and column description handed to the SQL translator.
    async fn schema_context(&self) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait SqlTranslator: Send + Sync {
    async fn translate(&self, question: &str, schema: &str) -> Result<String, CollaboratorError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDraft {
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub overall: String,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, review_texts: &[String]) -> Result<SummaryDraft, CollaboratorError>;
}

#[async_trait]
pub trait Researcher: Send + Sync {
    async fn research(&self, intent: &str) -> Result<Vec<String>, CollaboratorError>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// What the classifier sees: the turn, the registry, and a digest of the conversation.
pub struct ClassificationRequest<'a> {
    pub text: &'a str,
    pub registry: &'a CapabilityRegistry,
    pub context: ConversationDigest,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConversationDigest {
    pub recent_turns: Vec<String>,
    pub last_result_kind: Option<String>,
    /// `(position, label)` of entities the shopper can refer back to.
    pub entities: Vec<(usize, String)>,
    pub active_capability: Option<String>,
    pub active_query: Option<String>,
    pub active_filters: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedStep {
    pub capability: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub constraints: Vec<RawConstraint>,
    /// Mention of an entity from the previous result ("the second one").
    #[serde(default)]
    pub reference: Option<String>,
    /// Indexes of earlier steps in this turn whose output this step consumes.
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

impl ClassifiedStep {
    pub fn new(capability: impl Into<String>) -> Self {
        Self { capability: capability.into(), ..Self::default() }
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn constraint(mut self, constraint: RawConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn reference(mut self, mention: impl Into<String>) -> Self {
        self.reference = Some(mention.into());
        self
    }

    pub fn after(mut self, step: usize) -> Self {
        self.depends_on.push(step);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub steps: Vec<ClassifiedStep>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub refinement: bool,
    /// Follow-up question proposed by the classifier for unclear turns.
    #[serde(default)]
    pub clarification: Option<String>,
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify_intent(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Classification, CollaboratorError>;
}
