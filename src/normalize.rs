use std::collections::BTreeMap;

use crate::issue::{FieldSet, RawIssue, StandardizedIssue};

/// Raw custom-field ids with a known human-readable name.
pub const BUILTIN_RENAMES: &[(&str, &str)] = &[
    ("customfield_12001", "requirementId"),
    ("customfield_12108", "skillsNotes"),
    ("customfield_12221", "account"),
    ("customfield_12225", "approach"),
    ("customfield_12235", "requestLanguage"),
    ("customfield_12236", "devices"),
    ("customfield_12269", "overageCalculator"),
    ("customfield_12273", "workRatioAutomation"),
    ("customfield_12281", "acceptanceCriteria"),
    ("customfield_12285", "productboardUrl"),
    ("customfield_11303", "startDate"),
    ("customfield_10001", "sprint"),
    ("customfield_10002", "epicLink"),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenameTableError {
    #[error("raw keys '{first}' and '{second}' both map to standardized key '{standard}'")]
    DuplicateStandardKey {
        standard: String,
        first: String,
        second: String,
    },
    #[error("raw key '{0}' is mapped more than once")]
    DuplicateRawKey(String),
}

/// Raw key to standardized key mapping, invertible over the keys it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRenameTable {
    to_standard: BTreeMap<String, String>,
    to_raw: BTreeMap<String, String>,
}

impl FieldRenameTable {
    pub fn new<I, K, V>(entries: I) -> Result<Self, RenameTableError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut to_standard = BTreeMap::new();
        let mut to_raw: BTreeMap<String, String> = BTreeMap::new();

        for (raw, standard) in entries {
            let raw = raw.into();
            let standard = standard.into();
            if to_standard.contains_key(&raw) {
                return Err(RenameTableError::DuplicateRawKey(raw));
            }
            if let Some(first) = to_raw.get(&standard) {
                return Err(RenameTableError::DuplicateStandardKey {
                    standard,
                    first: first.clone(),
                    second: raw,
                });
            }
            to_raw.insert(standard.clone(), raw.clone());
            to_standard.insert(raw, standard);
        }

        Ok(Self { to_standard, to_raw })
    }

    pub fn builtin() -> Result<Self, RenameTableError> {
        Self::new(BUILTIN_RENAMES.iter().copied())
    }

    /// Returns a table where `overrides` replace or extend the current
    /// entries, validated as a whole.
    pub fn merged_with(
        &self,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Self, RenameTableError> {
        let mut entries = self.to_standard.clone();
        for (raw, standard) in overrides {
            entries.insert(raw.clone(), standard.clone());
        }
        Self::new(entries)
    }

    pub fn standard_key(&self, raw: &str) -> Option<&str> {
        self.to_standard.get(raw).map(String::as_str)
    }

    pub fn raw_key(&self, standard: &str) -> Option<&str> {
        self.to_raw.get(standard).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.to_standard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_standard.is_empty()
    }
}

/// Renames top-level field keys in both directions. Nested values are
/// carried over untouched.
///
/// `denormalize(normalize(x)) == x` holds as long as `x` does not already
/// use a standardized name as one of its raw keys.
#[derive(Debug, Clone)]
pub struct FieldNormalizer {
    table: FieldRenameTable,
}

impl FieldNormalizer {
    pub fn new(table: FieldRenameTable) -> Self {
        Self { table }
    }

    pub fn normalize(&self, raw: &FieldSet) -> FieldSet {
        raw.iter()
            .map(|(key, value)| {
                let key = self.table.standard_key(key).unwrap_or(key);
                (key.to_string(), value.clone())
            })
            .collect()
    }

    pub fn denormalize(&self, standardized: &FieldSet) -> FieldSet {
        standardized
            .iter()
            .map(|(key, value)| {
                let key = self.table.raw_key(key).unwrap_or(key);
                (key.to_string(), value.clone())
            })
            .collect()
    }

    pub fn standardize_issue(&self, issue: RawIssue) -> StandardizedIssue {
        StandardizedIssue {
            fields: self.normalize(&issue.fields),
            rendered_fields: self.normalize(&issue.rendered_fields),
            id: issue.id,
            key: issue.key,
            self_url: issue.self_url,
            expand: issue.expand,
        }
    }

    pub fn destandardize_issue(&self, issue: StandardizedIssue) -> RawIssue {
        RawIssue {
            fields: self.denormalize(&issue.fields),
            rendered_fields: self.denormalize(&issue.rendered_fields),
            id: issue.id,
            key: issue.key,
            self_url: issue.self_url,
            expand: issue.expand,
        }
    }
}
