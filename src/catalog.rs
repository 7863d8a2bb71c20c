//! Collects the closed set of string literals observed in issue data.
//!
//! Every issue contributes both its `fields` and `renderedFields` views.
//! Values are filed under catalog names such as `StatusName`,
//! `AssigneeEmailAddress` or `Custom12001`; catalogs are plain sets, so
//! discovery order never affects the output.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::issue::{FieldSet, StandardizedIssue};

pub const CUSTOM_FIELD_PREFIX: &str = "customfield_";
pub const CUSTOM_CATALOG_TAG: &str = "Custom";
pub const LABEL_CATALOG: &str = "Label";
pub const COMPONENT_CATALOG: &str = "ComponentName";

const USER_PROPS: &[&str] = &[
    "displayName",
    "emailAddress",
    "accountId",
    "accountType",
    "timeZone",
];
const STATUS_PROPS: &[&str] = &["name", "id", "key", "colorName"];
const STATUS_CATEGORY_PROPS: &[&str] = &["id", "key", "colorName", "name"];
const PRIORITY_PROPS: &[&str] = &["id", "name"];
const PROJECT_PROPS: &[&str] = &["key", "name", "projectTypeKey"];
const ISSUE_TYPE_PROPS: &[&str] = &["id", "name"];

/// Single-object fields: (field key, catalog prefix, extracted properties).
const OBJECT_FIELDS: &[(&str, &str, &[&str])] = &[
    ("status", "Status", STATUS_PROPS),
    ("priority", "Priority", PRIORITY_PROPS),
    ("project", "Project", PROJECT_PROPS),
    ("issuetype", "IssueType", ISSUE_TYPE_PROPS),
    ("reporter", "Reporter", USER_PROPS),
    ("assignee", "Assignee", USER_PROPS),
    ("creator", "Creator", USER_PROPS),
];

/// Probe order used to name an object-shaped component.
const COMPONENT_NAME_PROBES: &[&str] = &["name", "value", "displayName", "key"];

/// The shapes a field value can take, as far as literal extraction cares.
#[derive(Debug, Clone, Copy)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Record(&'a Map<String, Value>),
    List(&'a [Value]),
    Absent,
    Other,
}

impl<'a> From<&'a Value> for FieldValue<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::String(s) => FieldValue::Text(s),
            Value::Object(map) => FieldValue::Record(map),
            Value::Array(items) => FieldValue::List(items),
            Value::Null => FieldValue::Absent,
            Value::Bool(_) | Value::Number(_) => FieldValue::Other,
        }
    }
}

impl<'a> FieldValue<'a> {
    fn of(fields: &'a Map<String, Value>, key: &str) -> Self {
        fields.get(key).map(FieldValue::from).unwrap_or(FieldValue::Absent)
    }
}

/// Catalog name for a custom field: `customfield_12001` becomes `Custom12001`.
pub fn custom_catalog_name(field_key: &str) -> String {
    let suffix = field_key
        .strip_prefix(CUSTOM_FIELD_PREFIX)
        .unwrap_or(field_key);
    format!("{CUSTOM_CATALOG_TAG}{suffix}")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiteralCatalog {
    catalogs: BTreeMap<String, BTreeSet<String>>,
}

impl LiteralCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_issues<'a, I>(issues: I) -> Self
    where
        I: IntoIterator<Item = &'a StandardizedIssue>,
    {
        let mut catalog = Self::new();
        for issue in issues {
            catalog.collect_issue(issue);
        }
        catalog
    }

    /// Files a value unless it is blank.
    pub fn add(&mut self, name: &str, value: &str) {
        if value.trim().is_empty() {
            return;
        }
        self.catalogs
            .entry(name.to_string())
            .or_default()
            .insert(value.to_string());
    }

    fn add_value(&mut self, name: &str, value: Option<&Value>) {
        if let Some(FieldValue::Text(text)) = value.map(FieldValue::from) {
            self.add(name, text);
        }
    }

    pub fn collect_issue(&mut self, issue: &StandardizedIssue) {
        self.collect_fields(&issue.fields);
        self.collect_fields(&issue.rendered_fields);
    }

    pub fn collect_fields(&mut self, fields: &FieldSet) {
        for (field, prefix, props) in OBJECT_FIELDS {
            if let FieldValue::Record(object) = FieldValue::of(fields, field) {
                self.collect_props(prefix, object, props);
            }
        }

        if let FieldValue::Record(status) = FieldValue::of(fields, "status") {
            if let FieldValue::Record(category) = FieldValue::of(status, "statusCategory") {
                self.collect_props("StatusCategory", category, STATUS_CATEGORY_PROPS);
            }
        }

        if let FieldValue::List(labels) = FieldValue::of(fields, "labels") {
            for label in labels {
                self.add_value(LABEL_CATALOG, Some(label));
            }
        }

        if let FieldValue::List(components) = FieldValue::of(fields, "components") {
            for component in components {
                self.collect_component(component.into());
            }
        }

        for (key, value) in fields {
            if key.starts_with(CUSTOM_FIELD_PREFIX) {
                self.collect_custom(&custom_catalog_name(key), value.into());
            }
        }
    }

    fn collect_props(&mut self, prefix: &str, object: &Map<String, Value>, props: &[&str]) {
        for prop in props {
            let name = format!("{prefix}{}", capitalize(prop));
            self.add_value(&name, object.get(*prop));
        }
    }

    fn collect_component(&mut self, component: FieldValue<'_>) {
        match component {
            FieldValue::Text(name) => self.add(COMPONENT_CATALOG, name),
            FieldValue::Record(object) => {
                let first_present = COMPONENT_NAME_PROBES
                    .iter()
                    .find_map(|probe| object.get(*probe).filter(|v| !v.is_null()));
                self.add_value(COMPONENT_CATALOG, first_present);
            }
            FieldValue::List(_) | FieldValue::Absent | FieldValue::Other => {}
        }
    }

    fn collect_custom(&mut self, name: &str, value: FieldValue<'_>) {
        match value {
            FieldValue::Text(text) => self.add(name, text),
            FieldValue::List(items) => {
                for item in items {
                    match FieldValue::from(item) {
                        FieldValue::Text(text) => self.add(name, text),
                        FieldValue::Record(object) => self.collect_option(name, object),
                        _ => {}
                    }
                }
            }
            FieldValue::Record(object) => self.collect_option(name, object),
            FieldValue::Absent | FieldValue::Other => {}
        }
    }

    fn collect_option(&mut self, name: &str, object: &Map<String, Value>) {
        self.add_value(&format!("{name}Id"), object.get("id"));
        self.add_value(&format!("{name}Value"), object.get("value"));
    }

    pub fn get(&self, name: &str) -> Option<Vec<&str>> {
        self.catalogs
            .get(name)
            .map(|values| values.iter().map(String::as_str).collect())
    }

    /// Catalogs in name order, values sorted and unique. Catalogs never
    /// hold zero values, so nothing empty is yielded.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Vec<&str>)> {
        self.catalogs
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| (name.as_str(), values.iter().map(String::as_str).collect()))
    }

    pub fn len(&self) -> usize {
        self.catalogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn issue(key: &str, fields: Value) -> StandardizedIssue {
        StandardizedIssue {
            key: key.into(),
            fields: fields.as_object().cloned().expect("object"),
            ..StandardizedIssue::default()
        }
    }

    #[test]
    fn status_names_are_sorted_and_absent_fields_omitted() {
        let issues = vec![
            issue("A-1", json!({"status": {"name": "Open"}})),
            issue("A-2", json!({"status": {"name": "Done"}})),
        ];

        let catalog = LiteralCatalog::from_issues(&issues);

        assert_eq!(catalog.get("StatusName"), Some(vec!["Done", "Open"]));
        assert_eq!(catalog.get("ComponentName"), None);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn extracts_object_fields_and_status_category() {
        let catalog = LiteralCatalog::from_issues(&[issue(
            "A-1",
            json!({
                "status": {
                    "name": "In Progress",
                    "id": "3",
                    "statusCategory": {"id": 4, "key": "indeterminate", "colorName": "yellow", "name": "In Progress"}
                },
                "priority": {"id": "2", "name": "High"},
                "project": {"key": "ACME", "name": "Acme", "projectTypeKey": "software"},
                "issuetype": {"id": "10000", "name": "Project"},
                "assignee": {"displayName": "Ada", "emailAddress": "ada@example.com", "active": true},
                "reporter": null,
                "creator": {"accountId": "abc", "timeZone": "Europe/Amsterdam"}
            }),
        )]);

        assert_eq!(catalog.get("StatusId"), Some(vec!["3"]));
        assert_eq!(catalog.get("StatusCategoryKey"), Some(vec!["indeterminate"]));
        assert_eq!(catalog.get("StatusCategoryId"), None);
        assert_eq!(catalog.get("PriorityName"), Some(vec!["High"]));
        assert_eq!(catalog.get("ProjectProjectTypeKey"), Some(vec!["software"]));
        assert_eq!(catalog.get("IssueTypeName"), Some(vec!["Project"]));
        assert_eq!(catalog.get("AssigneeEmailAddress"), Some(vec!["ada@example.com"]));
        assert_eq!(catalog.get("CreatorTimeZone"), Some(vec!["Europe/Amsterdam"]));
        assert!(catalog.iter().all(|(name, _)| !name.starts_with("Reporter")));
    }

    #[test]
    fn skips_blank_values() {
        let catalog = LiteralCatalog::from_issues(&[issue(
            "A-1",
            json!({"labels": ["", "  ", "backend"], "status": {"name": " "}}),
        )]);

        assert_eq!(catalog.get("Label"), Some(vec!["backend"]));
        assert_eq!(catalog.get("StatusName"), None);
    }

    #[test]
    fn resolves_component_names_by_probe_order() {
        let catalog = LiteralCatalog::from_issues(&[issue(
            "A-1",
            json!({"components": [
                "Bare",
                {"name": "Named", "value": "ignored"},
                {"name": null, "value": "Valued"},
                {"displayName": "Displayed", "key": "ignored"},
                {"key": "Keyed"},
                {"name": 7, "value": "not reached"},
                {}
            ]}),
        )]);

        assert_eq!(
            catalog.get("ComponentName"),
            Some(vec!["Bare", "Displayed", "Keyed", "Named", "Valued"])
        );
    }

    #[test]
    fn files_custom_field_shapes() {
        let catalog = LiteralCatalog::from_issues(&[issue(
            "A-1",
            json!({
                "customfield_12001": "R-9",
                "customfield_12236": [
                    "loose",
                    {"self": "x", "id": "1", "value": "Phone"},
                    {"id": "2", "value": "Tablet"}
                ],
                "customfield_12269": {"id": "7", "value": "Yes"},
                "customfield_12273": 4,
                "customfield_10500": null
            }),
        )]);

        assert_eq!(catalog.get("Custom12001"), Some(vec!["R-9"]));
        assert_eq!(catalog.get("Custom12236"), Some(vec!["loose"]));
        assert_eq!(catalog.get("Custom12236Id"), Some(vec!["1", "2"]));
        assert_eq!(catalog.get("Custom12236Value"), Some(vec!["Phone", "Tablet"]));
        assert_eq!(catalog.get("Custom12269Value"), Some(vec!["Yes"]));
        assert_eq!(catalog.get("Custom12273"), None);
        assert_eq!(catalog.get("Custom10500"), None);
    }

    #[test]
    fn reads_rendered_fields_too() {
        let mut issue = issue("A-1", json!({"labels": ["one"]}));
        issue.rendered_fields = json!({"labels": ["two"], "customfield_1": "<p>x</p>"})
            .as_object()
            .cloned()
            .expect("object");

        let catalog = LiteralCatalog::from_issues(&[issue]);

        assert_eq!(catalog.get("Label"), Some(vec!["one", "two"]));
        assert_eq!(catalog.get("Custom1"), Some(vec!["<p>x</p>"]));
    }

    #[test]
    fn custom_names_do_not_collide() {
        assert_eq!(custom_catalog_name("customfield_12001"), "Custom12001");
        assert_ne!(
            custom_catalog_name("customfield_12001"),
            custom_catalog_name("customfield_1200")
        );
    }

    #[test]
    fn collecting_twice_is_idempotent() {
        let issues = vec![
            issue("A-1", json!({"labels": ["b", "a"], "priority": {"name": "Low"}})),
            issue("A-2", json!({"labels": ["a"]})),
        ];

        let once = LiteralCatalog::from_issues(&issues);
        let mut twice = LiteralCatalog::from_issues(&issues);
        for issue in &issues {
            twice.collect_issue(issue);
        }

        assert_eq!(once, twice);
    }
}
