use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Top-level field map of an issue (`fields` or `renderedFields`).
pub type FieldSet = Map<String, Value>;

/// Issue exactly as the search endpoint returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIssue {
    #[serde(default)]
    pub id: String,
    pub key: String,
    #[serde(rename = "self", default)]
    pub self_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub expand: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: FieldSet,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rendered_fields: FieldSet,
}

/// Issue whose field sets went through the field normalizer.
///
/// Equality is by `key` only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardizedIssue {
    pub id: String,
    pub key: String,
    #[serde(rename = "self")]
    pub self_url: String,
    pub expand: String,
    pub fields: FieldSet,
    pub rendered_fields: FieldSet,
}

impl PartialEq for StandardizedIssue {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for StandardizedIssue {}

impl StandardizedIssue {
    pub fn created(&self) -> Option<DateTime<FixedOffset>> {
        self.fields
            .get("created")
            .and_then(Value::as_str)
            .and_then(parse_jira_timestamp)
    }

    pub fn summary(&self) -> Option<&str> {
        self.fields.get("summary").and_then(Value::as_str)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Parses `2024-03-01T09:15:00.000+0000` as well as RFC 3339.
pub fn parse_jira_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
}

/// Project prefix of an issue key: `ACME` for `ACME-42`.
pub fn project_prefix(key: &str) -> Option<&str> {
    key.split_once('-')
        .map(|(prefix, _)| prefix)
        .filter(|prefix| !prefix.is_empty())
}

/// Keeps the first issue seen for each key.
pub fn dedupe_by_key(issues: Vec<StandardizedIssue>) -> Vec<StandardizedIssue> {
    let mut seen = HashSet::new();
    issues
        .into_iter()
        .filter(|issue| seen.insert(issue.key.clone()))
        .collect()
}

/// Oldest first; undated issues last; ties broken by key.
pub fn sort_by_created(issues: &mut [StandardizedIssue]) {
    issues.sort_by(|a, b| {
        let by_created = match (a.created(), b.created()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_created.then_with(|| a.key.cmp(&b.key))
    });
}
