//! Benchmark tree, control and query definitions as served by the benchmark
//! service.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A node of a benchmark tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Child benchmark IDs.
    #[serde(default)]
    pub children: Vec<String>,
    /// Control IDs attached directly to this node.
    #[serde(default)]
    pub controls: Vec<String>,
    /// Whether results of this benchmark feed drift detection.
    #[serde(default)]
    pub tracks_drift_events: bool,
    /// Integration types this benchmark applies to; empty means all.
    #[serde(default)]
    pub integration_types: Vec<String>,
}

impl Benchmark {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            children: Vec::new(),
            controls: Vec::new(),
            tracks_drift_events: false,
            integration_types: Vec::new(),
        }
    }

    pub fn with_children<I, S>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_controls<I, S>(mut self, controls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.controls = controls.into_iter().map(Into::into).collect();
        self
    }

    pub fn tracking_drift_events(mut self) -> Self {
        self.tracks_drift_events = true;
        self
    }
}

/// A named check bound to one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub id: String,
    #[serde(default)]
    pub severity: Severity,
    /// Controls without a query are informational and produce no runner.
    #[serde(default)]
    pub query_id: Option<String>,
}

impl Control {
    pub fn new(id: impl Into<String>, query_id: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            severity,
            query_id: Some(query_id.into()),
        }
    }
}

/// A named parameter the worker substitutes into the query text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub key: String,
    #[serde(default)]
    pub required: bool,
}

/// A policy check definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    #[serde(default)]
    pub query_text: String,
    #[serde(default)]
    pub engine: String,
    /// Integration types the query can run against; empty means any.
    #[serde(default)]
    pub integration_types: Vec<String>,
    /// Evaluated once per job instead of once per integration.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub parameters: Vec<QueryParameter>,
}

impl Query {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query_text: String::new(),
            engine: "sql".to_string(),
            integration_types: Vec::new(),
            global: false,
            parameters: Vec::new(),
        }
    }

    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn restricted_to<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.integration_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this query may run against an integration of the given type.
    ///
    /// Global queries are never excluded by type.
    pub fn applies_to(&self, integration_type: &str) -> bool {
        self.global
            || self.integration_types.is_empty()
            || self.integration_types.iter().any(|t| t == integration_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_applies_to() {
        let unrestricted = Query::new("q0");
        let aws_only = Query::new("q1").restricted_to(["aws"]);
        let global_aws = Query::new("q2").restricted_to(["aws"]).global();

        assert!(unrestricted.applies_to("azure"));
        assert!(aws_only.applies_to("aws"));
        assert!(!aws_only.applies_to("azure"));
        assert!(global_aws.applies_to("azure"));
    }

    #[test]
    fn test_control_deserializes_without_query() {
        let control: Control =
            serde_json::from_str(r#"{"id":"c1","severity":"critical"}"#).expect("should parse");
        assert_eq!(control.severity, Severity::Critical);
        assert!(control.query_id.is_none());
    }
}
