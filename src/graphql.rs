// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! GraphQL-over-HTTP envelope types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct GraphQlRequest {
    pub query: String,
    pub variables: Value,
}

impl GraphQlRequest {
    pub fn new(query: impl Into<String>, variables: Value) -> Self {
        GraphQlRequest {
            query: query.into(),
            variables,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQlError>>,
}

impl GraphQlResponse {
    /// Errors that came back alongside (possibly partial) data.
    pub fn errors(&self) -> &[GraphQlError] {
        self.errors.as_deref().unwrap_or(&[])
    }

    pub fn is_partial_failure(&self) -> bool {
        !self.errors().is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default)]
    pub path: Vec<PathSegment>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum PathSegment {
    Index(u64),
    Key(String),
}

impl PathSegment {
    /// Numeric segments, including keys such as `"2"` sent as strings.
    pub fn as_index(&self) -> Option<u64> {
        match self {
            PathSegment::Index(i) => Some(*i),
            PathSegment::Key(k) => k.parse::<u64>().ok(),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{}", i),
            PathSegment::Key(k) => write!(f, "{}", k),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        PathSegment::Key(s.to_string())
    }
}

impl From<u64> for PathSegment {
    fn from(i: u64) -> Self {
        PathSegment::Index(i)
    }
}

pub fn dotted_path(path: &[PathSegment]) -> String {
    path.iter().map(|segment| segment.to_string()).collect::<Vec<_>>().join(".")
}
