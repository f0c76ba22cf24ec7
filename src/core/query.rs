//! The research query every node's prompt is seeded from.
//!
//! A `Query` is immutable once constructed. Equality and hashing use the
//! normalized field set, so two queries that differ only in parameter
//! ordering or in an absent-vs-empty optional compare equal.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// A natural-language research request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    #[serde(
        default,
        rename = "additional_params",
        skip_serializing_if = "Option::is_none"
    )]
    params: Option<BTreeMap<String, Value>>,
}

/// Field set used for equality and hashing.
#[derive(Serialize)]
struct Normalized<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a BTreeMap<String, Value>>,
}

impl Query {
    /// Create a query from its text.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidQuery` if the text is empty or whitespace.
    pub fn new(query: &str) -> Result<Self> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidQuery("query must not be empty".to_string()));
        }
        Ok(Self {
            query: trimmed.to_string(),
            context: None,
            params: None,
        })
    }

    /// Attach free-text context.
    pub fn with_context(mut self, context: &str) -> Self {
        let trimmed = context.trim();
        self.context = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Attach a single parameter.
    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value);
        self
    }

    /// Validate a deserialized query, applying the same normalization as
    /// the builder methods.
    pub fn validated(self) -> Result<Self> {
        let mut query = Self::new(&self.query)?;
        if let Some(context) = self.context.as_deref() {
            query = query.with_context(context);
        }
        query.params = self.params.filter(|p| !p.is_empty());
        Ok(query)
    }

    pub fn text(&self) -> &str {
        &self.query
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn params(&self) -> Option<&BTreeMap<String, Value>> {
        self.params.as_ref()
    }

    /// Prompt fragment describing the optional context and parameters.
    ///
    /// Empty when neither is present.
    pub fn context_fragment(&self) -> String {
        let mut fragment = String::new();
        if let Some(context) = self.context() {
            fragment.push_str("\nAdditional Context: ");
            fragment.push_str(context);
        }
        if let Some(params) = self.params().filter(|p| !p.is_empty()) {
            fragment.push_str("\nAdditional Parameters:");
            for (key, value) in params {
                match value {
                    Value::String(s) => fragment.push_str(&format!("\n- {}: {}", key, s)),
                    other => fragment.push_str(&format!("\n- {}: {}", key, other)),
                }
            }
        }
        fragment
    }

    fn normalized(&self) -> Normalized<'_> {
        Normalized {
            query: &self.query,
            context: self.context.as_deref().filter(|c| !c.is_empty()),
            params: self.params.as_ref().filter(|p| !p.is_empty()),
        }
    }

    /// Canonical string form of the normalized field set.
    ///
    /// Suitable as a cache key: parameter maps serialize in sorted key order.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(&self.normalized()).unwrap_or_else(|_| self.query.clone())
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.cache_key() == other.cache_key()
    }
}

impl Eq for Query {}

impl Hash for Query {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cache_key().hash(state);
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.query)
    }
}
