//! Agent runtime for the shopping concierge.
//!
//! The deterministic orchestration lives in `shopper-core`. This crate supplies what talks
//! to the outside world on a turn's behalf:
//! - model clients and the model-backed collaborators (`llm`, `classifier`, `capabilities`)
//! - a rule-based intent classifier for offline runs (`conversation`)
//! - read-only enforcement for generated SQL (`guardrails`)
//! - capability execution with bounded retries (`tools`)
//! - the turn loop that routes, executes, merges, phrases and commits (`runtime`)
//!
//! # Safety Principle
//!
//! Models only translate. Filters are compiled and validated by the core, SQL passes the
//! guardrail before it runs, and state changes only through a committed turn.

pub mod capabilities;
pub mod classifier;
pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod prompts;
pub mod runtime;
pub mod tools;

pub use capabilities::{LlmResearcher, LlmSqlTranslator, LlmSummarizer, LlmTextGenerator};
pub use classifier::LlmIntentClassifier;
pub use conversation::RuleBasedClassifier;
pub use guardrails::{GuardrailDecision, SqlGuardrailPolicy};
pub use llm::{HttpLlmClient, LlmClient, LlmError};
pub use runtime::{AgentRuntime, TurnOutcome, TurnStatus};
pub use tools::{CapabilityExecutor, ExecutorSettings, RetryPolicy};
