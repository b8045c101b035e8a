// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Metadata predicates shared by graph neighbours, traversal steps and
//! flow searches

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Anything a [`Filter`] can be evaluated against
pub trait FieldGetter {
    fn field(&self, key: &str) -> Option<Value>;
}

impl FieldGetter for crate::metadata::Metadata {
    fn field(&self, key: &str) -> Option<Value> {
        self.get_field(key).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Exact match
    Term { key: String, value: Value },
    /// Not equal; an absent key also matches
    Ne { key: String, value: Value },
    /// Value is one of the given set
    Within { key: String, values: Vec<Value> },
    HasKey(String),
    Gte { key: String, value: f64 },
    Lte { key: String, value: f64 },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn term(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Term {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn ne(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn within(key: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::Within {
            key: key.into(),
            values,
        }
    }

    pub fn has_key(key: impl Into<String>) -> Self {
        Filter::HasKey(key.into())
    }

    /// Conjunction, collapsing the trivial cases
    pub fn all(mut filters: Vec<Filter>) -> Option<Filter> {
        match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Filter::And(filters)),
        }
    }

    pub fn eval<G: FieldGetter + ?Sized>(&self, target: &G) -> bool {
        match self {
            Filter::Term { key, value } => target
                .field(key)
                .map_or(false, |v| values_match(&v, value)),
            Filter::Ne { key, value } => target
                .field(key)
                .map_or(true, |v| !values_match(&v, value)),
            Filter::Within { key, values } => target
                .field(key)
                .map_or(false, |v| values.iter().any(|c| values_match(&v, c))),
            Filter::HasKey(key) => target.field(key).is_some(),
            Filter::Gte { key, value } => target
                .field(key)
                .and_then(|v| v.as_f64())
                .map_or(false, |v| v >= *value),
            Filter::Lte { key, value } => target
                .field(key)
                .and_then(|v| v.as_f64())
                .map_or(false, |v| v <= *value),
            Filter::And(fs) => fs.iter().all(|f| f.eval(target)),
            Filter::Or(fs) => fs.iter().any(|f| f.eval(target)),
            Filter::Not(f) => !f.eval(target),
        }
    }
}

/// Numbers compare by value so `1500` matches `1500.0`; an array field
/// matches when any of its items does.
pub fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Value::Array(items), e) if !e.is_array() => items.iter().any(|i| values_match(i, e)),
        (a, e) => a == e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use serde_json::json;

    fn iface() -> Metadata {
        Metadata::new()
            .with("Type", "veth")
            .with("MTU", 1500)
            .with("IPV4", json!(["10.0.0.1/24", "10.0.0.2/24"]))
    }

    #[test]
    fn test_term_and_ne() {
        let md = iface();
        assert!(Filter::term("Type", "veth").eval(&md));
        assert!(!Filter::term("Type", "bridge").eval(&md));
        assert!(Filter::ne("Type", "bridge").eval(&md));
        assert!(Filter::ne("Driver", "openvswitch").eval(&md));
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        assert!(Filter::term("MTU", 1500.0).eval(&iface()));
        assert!(Filter::Gte { key: "MTU".into(), value: 1000.0 }.eval(&iface()));
        assert!(!Filter::Lte { key: "MTU".into(), value: 1000.0 }.eval(&iface()));
    }

    #[test]
    fn test_within_and_array_fields() {
        let md = iface();
        assert!(Filter::within("Type", vec![json!("bridge"), json!("veth")]).eval(&md));
        assert!(Filter::term("IPV4", "10.0.0.2/24").eval(&md));
    }

    #[test]
    fn test_all_collapses() {
        assert!(Filter::all(vec![]).is_none());
        assert_eq!(
            Filter::all(vec![Filter::has_key("MTU")]),
            Some(Filter::has_key("MTU"))
        );
        let both = Filter::all(vec![Filter::has_key("MTU"), Filter::has_key("Nope")]).unwrap();
        assert!(!both.eval(&iface()));
        assert!(Filter::Not(Box::new(both)).eval(&iface()));
    }
}
