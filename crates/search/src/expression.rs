use std::fmt;

use shopper_core::domain::filter::{Collection, Constraint, Field, FilterSet, FilterValue, Operator};
use shopper_core::errors::CollaboratorError;

/// A [`FilterSet`] rendered in Discovery Engine filter syntax, e.g.
/// `price < 50 AND average_rating >= 4.5 AND main_category: ANY("Shoes")`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterExpression(String);

impl FilterExpression {
    /// `Ok(None)` when there is nothing to filter on.
    pub fn for_collection(
        collection: Collection,
        filters: &FilterSet,
    ) -> Result<Option<Self>, CollaboratorError> {
        let clauses = filters
            .iter()
            .map(|constraint| clause(collection, constraint))
            .collect::<Result<Vec<_>, _>>()?;

        if clauses.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self(clauses.join(" AND "))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Datastore column backing a field in the given collection.
pub fn column(collection: Collection, field: Field) -> Option<&'static str> {
    match (collection, field) {
        (Collection::Items, Field::Price) => Some("price"),
        (Collection::Items, Field::Rating) => Some("average_rating"),
        (Collection::Items, Field::RatingCount) => Some("rating_number"),
        (Collection::Items, Field::Category) => Some("main_category"),
        (Collection::Items, Field::Brand) => Some("store"),
        (Collection::Reviews, Field::Rating) => Some("rating"),
        (Collection::Reviews, Field::HelpfulVotes) => Some("helpful_vote"),
        (_, Field::ParentAsin) => Some("parent_asin"),
        _ => None,
    }
}

fn clause(collection: Collection, constraint: &Constraint) -> Result<String, CollaboratorError> {
    let name = column(collection, constraint.field).ok_or_else(|| {
        CollaboratorError::Rejected(format!(
            "{} cannot be filtered in the {} collection",
            constraint.field,
            collection.as_str()
        ))
    })?;

    let rendered = match (constraint.operator, &constraint.value) {
        (Operator::Lt, FilterValue::Number(value)) => format!("{name} < {value}"),
        (Operator::Lte, FilterValue::Number(value)) => format!("{name} <= {value}"),
        (Operator::Gt, FilterValue::Number(value)) => format!("{name} > {value}"),
        (Operator::Gte, FilterValue::Number(value)) => format!("{name} >= {value}"),
        (Operator::Eq, FilterValue::Number(value)) => format!("{name} = {value}"),
        (Operator::In, FilterValue::NumberSet(values)) => {
            let alternatives: Vec<String> =
                values.iter().map(|value| format!("{name} = {value}")).collect();
            match alternatives.as_slice() {
                [single] => single.clone(),
                _ => format!("({})", alternatives.join(" OR ")),
            }
        }
        (Operator::Eq, FilterValue::Text(value)) => format!("{name}: ANY({})", quoted(value)),
        (Operator::In, FilterValue::TextSet(values)) => {
            let options: Vec<String> = values.iter().map(|value| quoted(value)).collect();
            format!("{name}: ANY({})", options.join(", "))
        }
        (operator, value) => {
            return Err(CollaboratorError::Rejected(format!(
                "cannot render {name} {operator} {value:?}"
            )))
        }
    };
    Ok(rendered)
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.trim().replace('\\', "\\\\").replace('"', "\\\""))
}
