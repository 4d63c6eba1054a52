use serde::{Deserialize, Serialize};

use crate::domain::filter::{Constraint, Field, FilterSet, FilterValue, Operator};
use crate::errors::ConstraintError;

/// A constraint as named by the caller, before normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawConstraint {
    pub field: String,
    pub comparison: String,
    pub value: RawValue,
}

impl RawConstraint {
    pub fn new(field: impl Into<String>, comparison: impl Into<String>, value: RawValue) -> Self {
        Self { field: field.into(), comparison: comparison.into(), value }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    List(Vec<RawValue>),
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Comparison {
    Plain(Operator),
    Between,
}

const FIELD_ALIASES: &[(&str, Field)] = &[
    ("price", Field::Price),
    ("cost", Field::Price),
    ("budget", Field::Price),
    ("rating", Field::Rating),
    ("stars", Field::Rating),
    ("star", Field::Rating),
    ("average rating", Field::Rating),
    ("avg rating", Field::Rating),
    ("rating count", Field::RatingCount),
    ("rating number", Field::RatingCount),
    ("ratings", Field::RatingCount),
    ("review count", Field::RatingCount),
    ("reviews", Field::RatingCount),
    ("helpful votes", Field::HelpfulVotes),
    ("helpful vote", Field::HelpfulVotes),
    ("helpful", Field::HelpfulVotes),
    ("category", Field::Category),
    ("main category", Field::Category),
    ("type", Field::Category),
    ("brand", Field::Brand),
    ("store", Field::Brand),
    ("maker", Field::Brand),
    ("parent asin", Field::ParentAsin),
    ("asin", Field::ParentAsin),
    ("product id", Field::ParentAsin),
];

const COMPARISON_PHRASES: &[(&str, Comparison)] = &[
    ("lt", Comparison::Plain(Operator::Lt)),
    ("<", Comparison::Plain(Operator::Lt)),
    ("under", Comparison::Plain(Operator::Lt)),
    ("below", Comparison::Plain(Operator::Lt)),
    ("less than", Comparison::Plain(Operator::Lt)),
    ("cheaper than", Comparison::Plain(Operator::Lt)),
    ("lte", Comparison::Plain(Operator::Lte)),
    ("<=", Comparison::Plain(Operator::Lte)),
    ("at most", Comparison::Plain(Operator::Lte)),
    ("no more than", Comparison::Plain(Operator::Lte)),
    ("up to", Comparison::Plain(Operator::Lte)),
    ("max", Comparison::Plain(Operator::Lte)),
    ("maximum", Comparison::Plain(Operator::Lte)),
    ("gt", Comparison::Plain(Operator::Gt)),
    (">", Comparison::Plain(Operator::Gt)),
    ("over", Comparison::Plain(Operator::Gt)),
    ("above", Comparison::Plain(Operator::Gt)),
    ("more than", Comparison::Plain(Operator::Gt)),
    ("greater than", Comparison::Plain(Operator::Gt)),
    ("gte", Comparison::Plain(Operator::Gte)),
    (">=", Comparison::Plain(Operator::Gte)),
    ("at least", Comparison::Plain(Operator::Gte)),
    ("min", Comparison::Plain(Operator::Gte)),
    ("minimum", Comparison::Plain(Operator::Gte)),
    ("or more", Comparison::Plain(Operator::Gte)),
    ("no less than", Comparison::Plain(Operator::Gte)),
    ("+", Comparison::Plain(Operator::Gte)),
    ("eq", Comparison::Plain(Operator::Eq)),
    ("=", Comparison::Plain(Operator::Eq)),
    ("==", Comparison::Plain(Operator::Eq)),
    ("is", Comparison::Plain(Operator::Eq)),
    ("equals", Comparison::Plain(Operator::Eq)),
    ("exactly", Comparison::Plain(Operator::Eq)),
    ("in", Comparison::Plain(Operator::In)),
    ("any of", Comparison::Plain(Operator::In)),
    ("one of", Comparison::Plain(Operator::In)),
    ("between", Comparison::Between),
];

/// Compiles raw descriptors into a validated [`FilterSet`].
///
/// Pure: the same descriptors always produce the same set or the same error.
pub fn compile(raw: &[RawConstraint]) -> Result<FilterSet, ConstraintError> {
    let mut constraints = Vec::with_capacity(raw.len());
    for descriptor in raw {
        constraints.extend(normalize(descriptor)?);
    }
    FilterSet::try_from_constraints(constraints)
}

pub fn resolve_field(name: &str) -> Result<Field, ConstraintError> {
    let key = canonical(name);
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, field)| *field)
        .ok_or_else(|| ConstraintError::UnknownField(name.trim().to_string()))
}

fn resolve_comparison(phrase: &str) -> Result<Comparison, ConstraintError> {
    let key = canonical(phrase);
    COMPARISON_PHRASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, comparison)| *comparison)
        .ok_or_else(|| ConstraintError::UnknownComparison(phrase.trim().to_string()))
}

fn normalize(descriptor: &RawConstraint) -> Result<Vec<Constraint>, ConstraintError> {
    let field = resolve_field(&descriptor.field)?;
    match resolve_comparison(&descriptor.comparison)? {
        Comparison::Between => {
            let RawValue::List(values) = &descriptor.value else {
                return Err(ConstraintError::MalformedBetween { field });
            };
            let [RawValue::Number(first), RawValue::Number(second)] = values.as_slice() else {
                return Err(ConstraintError::MalformedBetween { field });
            };
            let (low, high) = (first.min(*second), first.max(*second));
            Ok(vec![
                Constraint::number(field, Operator::Gte, low),
                Constraint::number(field, Operator::Lte, high),
            ])
        }
        Comparison::Plain(operator) => {
            let value = to_filter_value(field, operator, &descriptor.value)?;
            Ok(vec![Constraint::new(field, operator, value)])
        }
    }
}

fn to_filter_value(
    field: Field,
    operator: Operator,
    raw: &RawValue,
) -> Result<FilterValue, ConstraintError> {
    let flat_list = ConstraintError::ValueTypeMismatch { field, operator, expected: "a flat list" };
    match raw {
        RawValue::Number(value) if operator == Operator::In => {
            Ok(FilterValue::NumberSet(vec![*value]))
        }
        RawValue::Text(value) if operator == Operator::In => {
            Ok(FilterValue::TextSet(vec![value.trim().to_string()]))
        }
        RawValue::Number(value) => Ok(FilterValue::Number(*value)),
        RawValue::Text(value) => Ok(FilterValue::Text(value.trim().to_string())),
        RawValue::List(values) => {
            if values.iter().all(|value| matches!(value, RawValue::Number(_))) {
                let numbers = values
                    .iter()
                    .filter_map(|value| match value {
                        RawValue::Number(number) => Some(*number),
                        _ => None,
                    })
                    .collect();
                Ok(FilterValue::NumberSet(numbers))
            } else if values.iter().all(|value| matches!(value, RawValue::Text(_))) {
                let names = values
                    .iter()
                    .filter_map(|value| match value {
                        RawValue::Text(text) => Some(text.trim().to_string()),
                        _ => None,
                    })
                    .collect();
                Ok(FilterValue::TextSet(names))
            } else {
                Err(flat_list)
            }
        }
    }
}

fn canonical(text: &str) -> String {
    text.trim()
        .to_ascii_lowercase()
        .split(|character: char| character.is_whitespace() || character == '_' || character == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::{compile, resolve_field, RawConstraint, RawValue};
    use crate::domain::filter::{Constraint, Field, FilterValue, Operator};
    use crate::errors::ConstraintError;

    #[test]
    fn normalizes_shopper_phrasings() {
        let filters = compile(&[
            RawConstraint::new("price", "under", 50.0.into()),
            RawConstraint::new("stars", "at least", 4.5.into()),
            RawConstraint::new("reviews", "or more", 500.0.into()),
        ])
        .expect("compiles");

        assert_eq!(
            filters.constraints(),
            &[
                Constraint::number(Field::Price, Operator::Lt, 50.0),
                Constraint::number(Field::Rating, Operator::Gte, 4.5),
                Constraint::number(Field::RatingCount, Operator::Gte, 500.0),
            ]
        );
    }

    #[test]
    fn low_star_reviews_become_a_rating_set() {
        let filters = compile(&[RawConstraint::new(
            "rating",
            "in",
            RawValue::List(vec![1.0.into(), 2.0.into()]),
        )])
        .expect("compiles");

        assert_eq!(
            filters.constraints(),
            &[Constraint::new(Field::Rating, Operator::In, FilterValue::NumberSet(vec![1.0, 2.0]))]
        );
    }

    #[test]
    fn between_expands_to_two_bounds() {
        let filters = compile(&[RawConstraint::new(
            "price",
            "between",
            RawValue::List(vec![80.0.into(), 20.0.into()]),
        )])
        .expect("compiles");

        assert_eq!(
            filters.constraints(),
            &[
                Constraint::number(Field::Price, Operator::Gte, 20.0),
                Constraint::number(Field::Price, Operator::Lte, 80.0),
            ]
        );
    }

    #[test]
    fn contradictory_bounds_fail() {
        let error = compile(&[
            RawConstraint::new("price", "gte", 100.0.into()),
            RawConstraint::new("price", "lt", 50.0.into()),
        ])
        .expect_err("empty interval");
        assert_eq!(error, ConstraintError::EmptyRange { field: Field::Price });
    }

    #[test]
    fn text_value_against_numeric_field_fails() {
        let error =
            compile(&[RawConstraint::new("price", "under", "fifty".into())]).expect_err("mismatch");
        assert!(matches!(error, ConstraintError::ValueTypeMismatch { field: Field::Price, .. }));
    }

    #[test]
    fn unknown_field_and_phrase_are_reported() {
        assert_eq!(
            compile(&[RawConstraint::new("colour", "is", "red".into())]),
            Err(ConstraintError::UnknownField("colour".to_string()))
        );
        assert_eq!(
            compile(&[RawConstraint::new("price", "roughly", 10.0.into())]),
            Err(ConstraintError::UnknownComparison("roughly".to_string()))
        );
    }

    #[test]
    fn field_aliases_ignore_case_and_separators() {
        assert_eq!(resolve_field("Average-Rating"), Ok(Field::Rating));
        assert_eq!(resolve_field("rating_number"), Ok(Field::RatingCount));
        assert_eq!(resolve_field(" main_category "), Ok(Field::Category));
    }

    #[test]
    fn raw_constraints_deserialize_from_model_json() {
        let raw: Vec<RawConstraint> = serde_json::from_str(
            r#"[{"field":"price","comparison":"under","value":50},
                {"field":"category","comparison":"in","value":["Swimwear","Sandals"]}]"#,
        )
        .expect("deserialize");

        let filters = compile(&raw).expect("compiles");
        assert_eq!(filters.len(), 2);
        assert_eq!(
            filters.constraints()[1].value,
            FilterValue::TextSet(vec!["Swimwear".into(), "Sandals".into()])
        );
    }
}
