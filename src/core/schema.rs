//! Output contracts for nodes that return structured data.
//!
//! Each `OutputSchema` pairs a field descriptor (checked against the raw
//! JSON a model returns) with a typed record that the rest of the crate
//! consumes. Validation happens once, at the executor boundary; a payload
//! recorded as structured is guaranteed to deserialize into its record.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;

/// Fenced code block, optionally tagged `json`.
static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap());

/// Minimum number of search queries the query-generation node must produce.
pub const MIN_SEARCH_QUERIES: usize = 5;

/// Structured output contracts known to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSchema {
    /// Verdict of the relevancy gate.
    RelevancyVerdict,
    /// List of search queries fed to the retrieval tools.
    SearchQueries,
    /// Final cited research report.
    ResearchReport,
}

/// JSON type expected for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Bool,
    Number,
    StringList,
    ObjectList,
    Object,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Number => value.is_number(),
            FieldKind::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            FieldKind::ObjectList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_object)),
            FieldKind::Object => value.is_object(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Bool => "boolean",
            FieldKind::Number => "number",
            FieldKind::StringList => "array of strings",
            FieldKind::ObjectList => "array of objects",
            FieldKind::Object => "object",
        }
    }
}

/// One field of a schema descriptor.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Optional fields may be absent or `null`.
    pub required: bool,
}

const fn field(name: &'static str, kind: FieldKind, required: bool) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required,
    }
}

const RELEVANCY_FIELDS: &[FieldSpec] = &[
    field("query", FieldKind::String, true),
    field("relevant", FieldKind::Bool, true),
    field("reasons", FieldKind::StringList, false),
    field("suggestions", FieldKind::StringList, false),
];

const SEARCH_QUERY_FIELDS: &[FieldSpec] = &[field("queries", FieldKind::StringList, true)];

const REPORT_FIELDS: &[FieldSpec] = &[
    field("findings", FieldKind::String, true),
    field("sources", FieldKind::ObjectList, true),
    field("confidence_score", FieldKind::Number, true),
    field("related_topics", FieldKind::StringList, true),
    field("metadata", FieldKind::Object, false),
];

/// Reasons a raw output fails its contract.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaViolation {
    #[error("output contains no JSON object")]
    NotJson,

    #[error("output is not a JSON object")]
    NotObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("{0}")]
    Constraint(String),
}

impl OutputSchema {
    pub fn name(&self) -> &'static str {
        match self {
            OutputSchema::RelevancyVerdict => "relevancy_verdict",
            OutputSchema::SearchQueries => "search_queries",
            OutputSchema::ResearchReport => "research_report",
        }
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            OutputSchema::RelevancyVerdict => RELEVANCY_FIELDS,
            OutputSchema::SearchQueries => SEARCH_QUERY_FIELDS,
            OutputSchema::ResearchReport => REPORT_FIELDS,
        }
    }

    /// Human-readable shape, appended to the instructions so the model
    /// knows what to return.
    pub fn describe(&self) -> String {
        let fields = self
            .fields()
            .iter()
            .map(|f| {
                format!(
                    "  \"{}\": {}{}",
                    f.name,
                    f.kind.as_str(),
                    if f.required { "" } else { " | null" }
                )
            })
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "Respond with a single JSON object ({}) of the form:\n{{\n{}\n}}",
            self.name(),
            fields
        )
    }

    /// Check a raw model output against this schema.
    ///
    /// Returns the parsed JSON object on success. The object is also
    /// deserialized into the schema's typed record so record-level
    /// constraints are enforced here rather than at the point of use.
    pub fn validate(&self, raw: &str) -> Result<Value, SchemaViolation> {
        let value = extract_json(raw).ok_or(SchemaViolation::NotJson)?;
        let object = value.as_object().ok_or(SchemaViolation::NotObject)?;

        for spec in self.fields() {
            match object.get(spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(SchemaViolation::MissingField(spec.name))
                }
                None | Some(Value::Null) => {}
                Some(v) if !spec.kind.matches(v) => {
                    return Err(SchemaViolation::WrongType {
                        field: spec.name,
                        expected: spec.kind.as_str(),
                    })
                }
                Some(_) => {}
            }
        }

        match self {
            OutputSchema::RelevancyVerdict => {
                decode::<RelevancyVerdict>(&value)?;
            }
            OutputSchema::SearchQueries => decode::<SearchQueries>(&value)?.check()?,
            OutputSchema::ResearchReport => decode::<ResearchReport>(&value)?.check()?,
        }

        Ok(value)
    }
}

impl std::fmt::Display for OutputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, SchemaViolation> {
    serde_json::from_value(value.clone()).map_err(|e| SchemaViolation::Constraint(e.to_string()))
}

/// Pull a JSON value out of model output.
///
/// Accepts bare JSON, JSON inside a fenced code block, or JSON surrounded
/// by prose (first `{` to last `}`).
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    if let Some(body) = FENCED_JSON_RE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
    {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            return Some(value);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Structured verdict returned by the relevancy gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevancyVerdict {
    pub query: String,
    pub relevant: bool,
    #[serde(default)]
    pub reasons: Option<Vec<String>>,
    #[serde(default)]
    pub suggestions: Option<Vec<String>>,
}

impl RelevancyVerdict {
    pub fn pass(query: &str) -> Self {
        Self {
            query: query.to_string(),
            relevant: true,
            reasons: None,
            suggestions: None,
        }
    }

    pub fn reject(query: &str, reasons: Vec<String>, suggestions: Vec<String>) -> Self {
        Self {
            query: query.to_string(),
            relevant: false,
            reasons: Some(reasons),
            suggestions: Some(suggestions),
        }
    }
}

/// Search queries produced for the retrieval nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQueries {
    pub queries: Vec<String>,
}

impl SearchQueries {
    fn check(&self) -> Result<(), SchemaViolation> {
        let distinct: HashSet<String> = self
            .queries
            .iter()
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty())
            .collect();
        if distinct.len() < MIN_SEARCH_QUERIES {
            return Err(SchemaViolation::Constraint(format!(
                "expected at least {} distinct non-empty queries, got {}",
                MIN_SEARCH_QUERIES,
                distinct.len()
            )));
        }
        Ok(())
    }
}

/// Final report produced by the synthesis node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub findings: String,
    pub sources: Vec<Map<String, Value>>,
    pub confidence_score: f64,
    pub related_topics: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl ResearchReport {
    fn check(&self) -> Result<(), SchemaViolation> {
        if self.findings.trim().is_empty() {
            return Err(SchemaViolation::Constraint("findings must not be blank".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(SchemaViolation::Constraint(format!(
                "confidence_score must be within [0, 1], got {}",
                self.confidence_score
            )));
        }
        if let Some(index) = self.sources.iter().position(Map::is_empty) {
            return Err(SchemaViolation::Constraint(format!(
                "source #{} is empty",
                index
            )));
        }
        Ok(())
    }

    /// A report without sources cannot attribute any claim.
    pub fn is_inconclusive(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Keys a cited source may use to name where it came from.
const SOURCE_KEYS: &[&str] = &["source", "url", "link"];

pub(crate) fn normalize_source(source: &str) -> String {
    source.trim().trim_end_matches('/').to_lowercase()
}

/// Identifier of a cited source, if it carries one.
pub fn source_identifier(source: &Map<String, Value>) -> Option<&str> {
    SOURCE_KEYS
        .iter()
        .filter_map(|key| source.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Check that every source cited by `report` was actually retrieved.
///
/// `known` holds the normalized identifiers of all evidence gathered
/// during the run.
pub fn check_citations(report: &ResearchReport, known: &HashSet<String>) -> Result<(), String> {
    for (index, source) in report.sources.iter().enumerate() {
        let id = source_identifier(source)
            .ok_or_else(|| format!("source #{} has no source, url or link", index))?;
        if !known.contains(&normalize_source(id)) {
            return Err(format!("unknown source: {}", id));
        }
    }
    Ok(())
}
