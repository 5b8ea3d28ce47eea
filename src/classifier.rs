//! # Intent classification
//!
//! Decides which retrieval path(s) a question should take.
//!
//! The classifier is an ordered rule table of `(terms, label)` pairs evaluated
//! first-match-wins over the lower-cased question. With the default configuration:
//!
//! 1. any document term (`resume`, `document`, `mentions`, ...) → [`QueryType::Unstructured`]
//! 2. any structured term (`count`, `average`, `salary`, `top`, ...) → [`QueryType::Structured`]
//! 3. nothing matched → the fallback, [`QueryType::Hybrid`]
//!
//! A question that matches both vocabularies is therefore `Unstructured`. This is a heuristic;
//! no confidence score is produced.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ClassifierConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Structured,
    Unstructured,
    Hybrid,
}

impl QueryType {
    pub fn includes_structured(self) -> bool {
        matches!(self, QueryType::Structured | QueryType::Hybrid)
    }

    pub fn includes_unstructured(self) -> bool {
        matches!(self, QueryType::Unstructured | QueryType::Hybrid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Structured => "structured",
            QueryType::Unstructured => "unstructured",
            QueryType::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the rule table.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub label: QueryType,
    terms: Vec<String>,
}

impl Rule {
    pub fn new<I, S>(label: QueryType, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            label,
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// `lowered` must already be lower-cased.
    pub fn matches(&self, lowered: &str) -> bool {
        self.terms.iter().any(|term| lowered.contains(term.as_str()))
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

#[derive(Debug, Clone)]
pub struct QueryClassifier {
    rules: Vec<Rule>,
    fallback: QueryType,
}

impl QueryClassifier {
    pub fn new(rules: Vec<Rule>, fallback: QueryType) -> Self {
        Self { rules, fallback }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(
            vec![
                Rule::new(QueryType::Unstructured, &config.document_terms),
                Rule::new(QueryType::Structured, &config.structured_terms),
            ],
            QueryType::Hybrid,
        )
    }

    pub fn classify(&self, question: &str) -> QueryType {
        let lowered = question.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map_or(self.fallback, |rule| rule.label)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}
