//! Queries and their classification

use serde::Serialize;
use std::fmt;

/// Longest accepted query, in characters
pub const MAX_QUERY_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("query is empty")]
    Empty,
    #[error("query is {chars} characters, limit is {limit}")]
    TooLong { chars: usize, limit: usize },
}

/// A validated, trimmed user query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    pub fn new(raw: &str) -> Result<Self, QueryError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(QueryError::Empty);
        }
        let chars = text.chars().count();
        if chars > MAX_QUERY_CHARS {
            return Err(QueryError::TooLong {
                chars,
                limit: MAX_QUERY_CHARS,
            });
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed taxonomy of analysis intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    ClauseSearch,
    ComplianceCheck,
    Summary,
    RiskAssessment,
    General,
}

impl QueryCategory {
    pub const ALL: [QueryCategory; 5] = [
        QueryCategory::ClauseSearch,
        QueryCategory::ComplianceCheck,
        QueryCategory::Summary,
        QueryCategory::RiskAssessment,
        QueryCategory::General,
    ];

    /// The label the classifier prompt asks the model to answer with
    pub fn label(self) -> &'static str {
        match self {
            QueryCategory::ClauseSearch => "clause_search",
            QueryCategory::ComplianceCheck => "compliance_check",
            QueryCategory::Summary => "document_summary",
            QueryCategory::RiskAssessment => "risk_assessment",
            QueryCategory::General => "general_inquiry",
        }
    }

    /// Map a model label back to a category, tolerating case, spacing and
    /// a few common synonyms
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
            .to_ascii_lowercase()
            .replace([' ', '-'], "_");

        match normalized.as_str() {
            "clause_search" | "clause_extraction" | "clause" => Some(QueryCategory::ClauseSearch),
            "compliance_check" | "compliance" => Some(QueryCategory::ComplianceCheck),
            "document_summary" | "summary" | "summarize" => Some(QueryCategory::Summary),
            "risk_assessment" | "risk" => Some(QueryCategory::RiskAssessment),
            "general_inquiry" | "general" => Some(QueryCategory::General),
            _ => None,
        }
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a classification resolved to the `General` fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    EmptyQuery,
    /// The model call failed after retries
    Upstream,
    /// The model answered outside the label set
    UnrecognizedLabel,
    LowConfidence,
}

/// Outcome of query classification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub category: QueryCategory,
    pub confidence: Option<f32>,
    /// Legal terms the model picked out of the query
    pub key_terms: Vec<String>,
    pub fallback: Option<FallbackReason>,
}

impl Classification {
    pub fn fallback(reason: FallbackReason) -> Self {
        Self {
            category: QueryCategory::General,
            confidence: None,
            key_terms: Vec::new(),
            fallback: Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}
