//! Search-backend adapters: filter-expression translation, the Discovery Engine REST
//! client and an in-memory backend for local runs.

pub mod discovery;
pub mod expression;
pub mod memory;
pub mod records;

pub use discovery::DiscoveryEngineClient;
pub use expression::FilterExpression;
pub use memory::InMemorySearchBackend;
