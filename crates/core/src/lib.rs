pub mod audit;
pub mod collaborators;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod filters;
pub mod merger;
pub mod registry;
pub mod router;

pub use collaborators::{
    AnalyticalDatabase, Classification, ClassificationRequest, ClassifiedStep,
    ConversationDigest, IntentClassifier, Researcher, SearchBackend, SearchHits, SqlTranslator,
    Summarizer, SummaryDraft, TextGenerator,
};
pub use conversation::{ActiveSearch, ConversationState, TurnRecord};
pub use domain::capability::{CapabilityId, CapabilityRequest, ContextRef, DelegationTarget};
pub use domain::filter::{
    Collection, Constraint, Field, FieldType, FilterSet, FilterValue, Filterable, Operator,
};
pub use domain::result::{
    CapabilityResult, EntityId, Idea, Item, Review, ReviewSummary, TableRows,
};
pub use errors::{CollaboratorError, ConstraintError, ErrorSeverity, OrchestrationError};
pub use filters::{compile, RawConstraint, RawValue};
pub use merger::{merge, MergedResponse, MergedSection, StepOutput};
pub use registry::{CapabilityDescriptor, CapabilityRegistry, ParameterSchema, SubjectRule};
pub use router::{committed_search, DelegationRouter};
