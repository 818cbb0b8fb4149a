use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::inner::conf::traits::Evaluate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Equals(String),
    NotEquals(String),
    #[serde(with = "serde_regex")]
    Regex(Regex),
}

impl PartialEq<Self> for Filter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Filter::Contains(left), Filter::Contains(right)) => left == right,
            (Filter::StartsWith(left), Filter::StartsWith(right)) => left == right,
            (Filter::EndsWith(left), Filter::EndsWith(right)) => left == right,
            (Filter::Equals(left), Filter::Equals(right)) => left == right,
            (Filter::NotEquals(left), Filter::NotEquals(right)) => left == right,
            (Filter::Regex(left), Filter::Regex(right)) => left.as_str() == right.as_str(),
            _ => false,
        }
    }
}

impl Eq for Filter {}

impl Evaluate<&str, bool> for Filter {
    fn evaluate(&self, source: &str) -> bool {
        match self {
            Filter::Contains(value) => source.contains(value),
            Filter::StartsWith(value) => source.starts_with(value),
            Filter::EndsWith(value) => source.ends_with(value),
            Filter::Equals(value) => source == value,
            Filter::NotEquals(value) => source != value,
            Filter::Regex(value) => value.is_match(source),
        }
    }
}

/// `None` filters accept anything; a name filter rejects peripherals that never advertised a name.
pub(crate) fn evaluate_optional_name(filter: Option<&Filter>, name: Option<&str>) -> bool {
    match (filter, name) {
        (Some(filter), Some(name)) => filter.evaluate(name),
        (Some(_), None) => false,
        (None, _) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate() {
        assert!(Filter::StartsWith("Pizza".to_string()).evaluate("PizzaBot-01"));
        assert!(!Filter::StartsWith("Pizza".to_string()).evaluate("ESP32C3"));
        assert!(Filter::Regex(Regex::new("^ESP32(C3)?$").unwrap()).evaluate("ESP32C3"));
        assert!(Filter::NotEquals("x".to_string()).evaluate("y"));

        assert!(evaluate_optional_name(None, None));
        assert!(!evaluate_optional_name(Some(&Filter::Contains("a".to_string())), None));
    }
}
