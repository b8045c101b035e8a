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

//! Traversal steps
//!
//! A traversal is an ordered list of [`Step`]s. The set of steps is closed;
//! the engine evaluates them with a single dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use topograph_core::{Filter, Identifier, Timestamp};

/// Right hand side of a `Has` style predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PredicateValue {
    /// Exact match
    Literal(Value),
    /// `Ne(v)`
    Ne(Value),
    /// `Within(v1, v2, ...)`
    Within(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub key: String,
    pub value: PredicateValue,
}

impl Predicate {
    pub fn literal(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: PredicateValue::Literal(value.into()),
        }
    }

    pub fn ne(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: PredicateValue::Ne(value.into()),
        }
    }

    pub fn within(key: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            value: PredicateValue::Within(values),
        }
    }

    pub fn to_filter(&self) -> Filter {
        match &self.value {
            PredicateValue::Literal(v) => Filter::term(self.key.clone(), v.clone()),
            PredicateValue::Ne(v) => Filter::ne(self.key.clone(), v.clone()),
            PredicateValue::Within(vs) => Filter::within(self.key.clone(), vs.clone()),
        }
    }
}

/// Conjunction of predicates, None when there are none
pub fn predicates_filter(predicates: &[Predicate]) -> Option<Filter> {
    Filter::all(predicates.iter().map(Predicate::to_filter).collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    /// Rebind to history at `time`, or `[time, time + duration]`
    Context {
        time: Timestamp,
        duration: Option<u64>,
    },
    /// Start from every vertex, or a single one
    V(Option<Identifier>),
    Has(Vec<Predicate>),
    HasKey(String),
    /// Children, filtered on their metadata
    Out(Vec<Predicate>),
    /// Parents
    In(Vec<Predicate>),
    Both(Vec<Predicate>),
    /// First element per distinct value of the key; identity by default
    Dedup(Option<String>),
    Count,
    Limit(usize),
    Metrics,
    Aggregates,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Context { .. } => "Context",
            Step::V(_) => "V",
            Step::Has(_) => "Has",
            Step::HasKey(_) => "HasKey",
            Step::Out(_) => "Out",
            Step::In(_) => "In",
            Step::Both(_) => "Both",
            Step::Dedup(_) => "Dedup",
            Step::Count => "Count",
            Step::Limit(_) => "Limit",
            Step::Metrics => "Metrics",
            Step::Aggregates => "Aggregates",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
