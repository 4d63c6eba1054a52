//! Filter Compiler: typed constraint descriptors in, validated [`FilterSet`] out.
//!
//! Natural-language phrasings ("under", "at least", "or more") map onto operators
//! through a fixed table; nothing here is inferred.
//!
//! [`FilterSet`]: crate::domain::filter::FilterSet

pub mod bounds;
pub mod compiler;

pub use compiler::{compile, resolve_field, RawConstraint, RawValue};
