use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ConstraintError;
use crate::filters::bounds;

const FLOAT_TOLERANCE: f64 = 1e-9;

/// Search collections exposed by the search backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Items,
    Reviews,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Items => "items",
            Self::Reviews => "reviews",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Price,
    Rating,
    RatingCount,
    HelpfulVotes,
    Category,
    Brand,
    ParentAsin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    /// Real-valued measurement (price, star rating).
    Decimal,
    /// Non-negative whole number (vote and rating counts).
    Count,
    Categorical,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Price,
        Field::Rating,
        Field::RatingCount,
        Field::HelpfulVotes,
        Field::Category,
        Field::Brand,
        Field::ParentAsin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Rating => "rating",
            Self::RatingCount => "rating_count",
            Self::HelpfulVotes => "helpful_votes",
            Self::Category => "category",
            Self::Brand => "brand",
            Self::ParentAsin => "parent_asin",
        }
    }

    pub fn field_type(self) -> FieldType {
        match self {
            Self::Price | Self::Rating => FieldType::Decimal,
            Self::RatingCount | Self::HelpfulVotes => FieldType::Count,
            Self::Category | Self::Brand | Self::ParentAsin => FieldType::Categorical,
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self.field_type(), FieldType::Categorical)
    }

    pub fn accepts(self, operator: Operator) -> bool {
        self.is_numeric() || matches!(operator, Operator::Eq | Operator::In)
    }

    /// Inclusive value domain for numeric fields.
    pub fn domain(self) -> (f64, f64) {
        match self {
            Self::Rating => (0.0, 5.0),
            _ => (0.0, f64::INFINITY),
        }
    }

    pub fn applies_to(self, collection: Collection) -> bool {
        match collection {
            Collection::Items => !matches!(self, Self::HelpfulVotes),
            Collection::Reviews => {
                matches!(self, Self::Rating | Self::HelpfulVotes | Self::ParentAsin)
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    In,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Eq => "eq",
            Self::In => "in",
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
    Number(f64),
    Text(String),
    NumberSet(Vec<f64>),
    TextSet(Vec<String>),
}

/// Read access used to evaluate constraints against retrieved records.
pub trait Filterable {
    fn numeric(&self, field: Field) -> Option<f64>;
    fn categorical(&self, field: Field) -> Option<&str>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub field: Field,
    pub operator: Operator,
    pub value: FilterValue,
}

impl Constraint {
    pub fn new(field: Field, operator: Operator, value: FilterValue) -> Self {
        Self { field, operator, value }
    }

    pub fn number(field: Field, operator: Operator, value: f64) -> Self {
        Self::new(field, operator, FilterValue::Number(value))
    }

    pub fn text_eq(field: Field, value: impl Into<String>) -> Self {
        Self::new(field, Operator::Eq, FilterValue::Text(value.into()))
    }

    /// Checks operator/value compatibility against the field's declared type.
    pub fn validate(&self) -> Result<(), ConstraintError> {
        let Self { field, operator, value } = self;
        let (field, operator) = (*field, *operator);

        if !field.accepts(operator) {
            return Err(ConstraintError::OperatorNotAllowed { field, operator });
        }

        let mismatch = |expected| ConstraintError::ValueTypeMismatch { field, operator, expected };
        match (field.is_numeric(), operator, value) {
            (true, Operator::In, FilterValue::NumberSet(values)) => {
                if values.is_empty() {
                    return Err(ConstraintError::EmptyValueSet { field });
                }
                values.iter().try_for_each(|value| check_numeric(field, *value))
            }
            (true, Operator::In, _) => Err(mismatch("a list of numbers")),
            (true, _, FilterValue::Number(value)) => check_numeric(field, *value),
            (true, _, _) => Err(mismatch("a number")),
            (false, Operator::In, FilterValue::TextSet(values)) => {
                if values.iter().all(|value| value.trim().is_empty()) {
                    return Err(ConstraintError::EmptyValueSet { field });
                }
                Ok(())
            }
            (false, Operator::In, _) => Err(mismatch("a list of names")),
            (false, _, FilterValue::Text(value)) if !value.trim().is_empty() => Ok(()),
            (false, _, _) => Err(mismatch("a name")),
        }
    }

    pub fn matches<R>(&self, record: &R) -> bool
    where
        R: Filterable + ?Sized,
    {
        if self.field.is_numeric() {
            let Some(actual) = record.numeric(self.field) else {
                return false;
            };
            return match (&self.operator, &self.value) {
                (Operator::Lt, FilterValue::Number(bound)) => actual < *bound,
                (Operator::Lte, FilterValue::Number(bound)) => actual <= *bound,
                (Operator::Gt, FilterValue::Number(bound)) => actual > *bound,
                (Operator::Gte, FilterValue::Number(bound)) => actual >= *bound,
                (Operator::Eq, FilterValue::Number(expected)) => approx_eq(actual, *expected),
                (Operator::In, FilterValue::NumberSet(options)) => {
                    options.iter().any(|option| approx_eq(actual, *option))
                }
                _ => false,
            };
        }

        let Some(actual) = record.categorical(self.field) else {
            return false;
        };
        match (&self.operator, &self.value) {
            (Operator::Eq, FilterValue::Text(expected)) => {
                actual.trim().eq_ignore_ascii_case(expected.trim())
            }
            (Operator::In, FilterValue::TextSet(options)) => {
                options.iter().any(|option| actual.trim().eq_ignore_ascii_case(option.trim()))
            }
            _ => false,
        }
    }
}

fn check_numeric(field: Field, value: f64) -> Result<(), ConstraintError> {
    let (low, high) = field.domain();
    if !value.is_finite() || value < low || value > high {
        return Err(ConstraintError::ValueOutOfRange { field, value });
    }
    if field.field_type() == FieldType::Count && value.fract() != 0.0 {
        return Err(ConstraintError::FractionalCount { field, value });
    }
    Ok(())
}

pub(crate) fn approx_eq(left: f64, right: f64) -> bool {
    (left - right).abs() < FLOAT_TOLERANCE
}

/// A validated conjunction of constraints.
///
/// Construction always goes through [`FilterSet::try_from_constraints`], so a value of
/// this type never carries a type mismatch or an empty range.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    constraints: Vec<Constraint>,
}

impl FilterSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn try_from_constraints(constraints: Vec<Constraint>) -> Result<Self, ConstraintError> {
        constraints.iter().try_for_each(Constraint::validate)?;
        bounds::check_satisfiable(&constraints)?;
        Ok(Self { constraints })
    }

    /// Re-runs validation, for sets that arrived through deserialization.
    pub fn validate(&self) -> Result<(), ConstraintError> {
        self.constraints.iter().try_for_each(Constraint::validate)?;
        bounds::check_satisfiable(&self.constraints)
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn fields(&self) -> BTreeSet<Field> {
        self.constraints.iter().map(|constraint| constraint.field).collect()
    }

    pub fn constraints_on(&self, field: Field) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(move |constraint| constraint.field == field)
    }

    pub fn matches<R>(&self, record: &R) -> bool
    where
        R: Filterable + ?Sized,
    {
        self.constraints.iter().all(|constraint| constraint.matches(record))
    }

    /// Applies a refinement: fields touched by `refinement` are replaced wholesale,
    /// every other prior constraint is kept in its original position.
    pub fn merge_refinement(&self, refinement: &FilterSet) -> Result<FilterSet, ConstraintError> {
        let replaced = refinement.fields();
        let mut merged: Vec<Constraint> = self
            .constraints
            .iter()
            .filter(|constraint| !replaced.contains(&constraint.field))
            .cloned()
            .collect();
        merged.extend(refinement.constraints.iter().cloned());
        FilterSet::try_from_constraints(merged)
    }
}

impl<'a> IntoIterator for &'a FilterSet {
    type Item = &'a Constraint;
    type IntoIter = std::slice::Iter<'a, Constraint>;

    fn into_iter(self) -> Self::IntoIter {
        self.constraints.iter()
    }
}
