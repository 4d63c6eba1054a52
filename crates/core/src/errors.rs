use thiserror::Error;

use crate::domain::capability::CapabilityId;
use crate::domain::filter::{Field, Operator};

/// Rejection reasons produced while compiling or merging constraints.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConstraintError {
    #[error("`{0}` is not a field I can filter on")]
    UnknownField(String),
    #[error("`{0}` is not a comparison I understand")]
    UnknownComparison(String),
    #[error("{field} cannot be compared with `{operator}`")]
    OperatorNotAllowed { field: Field, operator: Operator },
    #[error("{field} `{operator}` expects {expected}")]
    ValueTypeMismatch { field: Field, operator: Operator, expected: &'static str },
    #[error("{value} is outside the valid range for {field}")]
    ValueOutOfRange { field: Field, value: f64 },
    #[error("{field} must be a whole number, got {value}")]
    FractionalCount { field: Field, value: f64 },
    #[error("{field} needs at least one value to choose from")]
    EmptyValueSet { field: Field },
    #[error("`between` on {field} needs exactly two numbers")]
    MalformedBetween { field: Field },
    #[error("the conditions on {field} cannot all be true at once")]
    EmptyRange { field: Field },
    #[error("{field} does not apply to {capability}")]
    FieldNotApplicable { field: Field, capability: CapabilityId },
}

/// Failures reported by external collaborators (model, search, database).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator rejected the request: {0}")]
    Rejected(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("malformed collaborator response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Handled inside the turn by asking the user a follow-up question.
    Recoverable,
    /// The turn is aborted and conversation state stays untouched.
    TurnAborted,
    /// Deployment or configuration defect; must be escalated.
    Structural,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum OrchestrationError {
    #[error("invalid constraint: {0}")]
    InvalidConstraint(#[from] ConstraintError),
    #[error("unknown capability `{0}`")]
    UnknownCapability(String),
    #[error("turn could not be routed: {0}")]
    UnroutableTurn(String),
    #[error("could not resolve reference `{mention}`")]
    UnresolvedReference { mention: String },
    #[error("{capability} is missing required parameter `{parameter}`")]
    MissingParameter { capability: CapabilityId, parameter: &'static str },
    #[error("capability `{capability}` failed after {attempts} attempt(s): {source}")]
    CapabilityInvocationFailure {
        capability: String,
        attempts: u32,
        #[source]
        source: CollaboratorError,
    },
}

impl OrchestrationError {
    pub fn invocation(
        capability: impl Into<String>,
        attempts: u32,
        source: CollaboratorError,
    ) -> Self {
        Self::CapabilityInvocationFailure { capability: capability.into(), attempts, source }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidConstraint(_)
            | Self::UnresolvedReference { .. }
            | Self::MissingParameter { .. } => ErrorSeverity::Recoverable,
            Self::CapabilityInvocationFailure { .. } => ErrorSeverity::TurnAborted,
            Self::UnknownCapability(_) | Self::UnroutableTurn(_) => ErrorSeverity::Structural,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.severity() == ErrorSeverity::Recoverable
    }

    /// Text safe to show the shopper. Never includes raw error detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidConstraint(_) => {
                "Those filters contradict each other. Could you adjust the price, rating, or other limits?"
            }
            Self::UnresolvedReference { .. } => {
                "Which product do you mean? You can say something like \"the second one\"."
            }
            Self::MissingParameter { .. } => "Could you tell me a bit more about what you need?",
            Self::CapabilityInvocationFailure { .. } => {
                "Sorry, I ran into a problem while looking that up. Please try again in a moment."
            }
            Self::UnknownCapability(_) | Self::UnroutableTurn(_) => {
                "Sorry, I can't help with that request right now."
            }
        }
    }
}
