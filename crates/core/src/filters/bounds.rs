use std::collections::{BTreeMap, BTreeSet};

use crate::domain::filter::{approx_eq, Constraint, Field, FilterValue, Operator};
use crate::errors::ConstraintError;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Bound {
    value: f64,
    inclusive: bool,
}

/// Intersection of every numeric constraint on one field.
#[derive(Clone, Debug)]
struct NumericRange {
    lower: Bound,
    upper: Bound,
    allowed: Option<Vec<f64>>,
}

impl NumericRange {
    fn for_field(field: Field) -> Self {
        let (low, high) = field.domain();
        Self {
            lower: Bound { value: low, inclusive: true },
            upper: Bound { value: high, inclusive: true },
            allowed: None,
        }
    }

    fn tighten_lower(&mut self, candidate: Bound) {
        let tighter = candidate.value > self.lower.value
            || (candidate.value == self.lower.value && !candidate.inclusive);
        if tighter {
            self.lower = candidate;
        }
    }

    fn tighten_upper(&mut self, candidate: Bound) {
        let tighter = candidate.value < self.upper.value
            || (candidate.value == self.upper.value && !candidate.inclusive);
        if tighter {
            self.upper = candidate;
        }
    }

    fn restrict_to(&mut self, options: &[f64]) {
        let next = match self.allowed.take() {
            None => options.to_vec(),
            Some(current) => current
                .into_iter()
                .filter(|value| options.iter().any(|option| approx_eq(*value, *option)))
                .collect(),
        };
        self.allowed = Some(next);
    }

    fn apply(&mut self, operator: Operator, value: &FilterValue) {
        match (operator, value) {
            (Operator::Lt, FilterValue::Number(bound)) => {
                self.tighten_upper(Bound { value: *bound, inclusive: false })
            }
            (Operator::Lte, FilterValue::Number(bound)) => {
                self.tighten_upper(Bound { value: *bound, inclusive: true })
            }
            (Operator::Gt, FilterValue::Number(bound)) => {
                self.tighten_lower(Bound { value: *bound, inclusive: false })
            }
            (Operator::Gte, FilterValue::Number(bound)) => {
                self.tighten_lower(Bound { value: *bound, inclusive: true })
            }
            (Operator::Eq, FilterValue::Number(exact)) => {
                self.tighten_lower(Bound { value: *exact, inclusive: true });
                self.tighten_upper(Bound { value: *exact, inclusive: true });
            }
            (Operator::In, FilterValue::NumberSet(options)) => self.restrict_to(options),
            _ => {}
        }
    }

    fn contains(&self, value: f64) -> bool {
        let above = if self.lower.inclusive {
            value >= self.lower.value
        } else {
            value > self.lower.value
        };
        let below = if self.upper.inclusive {
            value <= self.upper.value
        } else {
            value < self.upper.value
        };
        above && below
    }

    fn is_empty(&self) -> bool {
        if self.lower.value > self.upper.value {
            return true;
        }
        if self.lower.value == self.upper.value && !(self.lower.inclusive && self.upper.inclusive)
        {
            return true;
        }
        match &self.allowed {
            Some(options) => !options.iter().any(|value| self.contains(*value)),
            None => false,
        }
    }
}

/// Fails with [`ConstraintError::EmptyRange`] when no value can satisfy every
/// constraint that targets the same field.
pub fn check_satisfiable(constraints: &[Constraint]) -> Result<(), ConstraintError> {
    let mut numeric: BTreeMap<Field, NumericRange> = BTreeMap::new();
    let mut categorical: BTreeMap<Field, BTreeSet<String>> = BTreeMap::new();

    for constraint in constraints {
        let field = constraint.field;
        if field.is_numeric() {
            numeric
                .entry(field)
                .or_insert_with(|| NumericRange::for_field(field))
                .apply(constraint.operator, &constraint.value);
            continue;
        }

        let options: BTreeSet<String> = match &constraint.value {
            FilterValue::Text(value) => BTreeSet::from([normalize(value)]),
            FilterValue::TextSet(values) => values.iter().map(|value| normalize(value)).collect(),
            _ => continue,
        };
        let allowed = categorical.entry(field).or_insert_with(|| options.clone());
        allowed.retain(|value| options.contains(value));
        if allowed.is_empty() {
            return Err(ConstraintError::EmptyRange { field });
        }
    }

    match numeric.into_iter().find(|(_, range)| range.is_empty()) {
        Some((field, _)) => Err(ConstraintError::EmptyRange { field }),
        None => Ok(()),
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
