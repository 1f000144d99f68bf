//! In-memory model of a session file.
//!
//! A session file is a tree of groups. Each group carries scalar attributes, child
//! groups and 2×N integer datasets. Storage backends translate the tree into their
//! own format; paths use `/` as separator (`mouse1/2024-05-01/behavior`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Absent value (device never reported an end timestamp, for example).
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(AttrValue::Null, Into::into)
    }
}

/// Two-row integer array: row 0 timestamps, row 1 payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// `[rows, columns]`, rows is always 2.
    pub shape: [usize; 2],
    /// Row-major data.
    pub data: [Vec<i64>; 2],
}

impl Dataset {
    /// Build from two rows of equal length.
    ///
    /// The longer row is truncated if the lengths differ.
    pub fn from_rows(mut timestamps: Vec<i64>, mut payloads: Vec<i64>) -> Self {
        let columns = timestamps.len().min(payloads.len());
        timestamps.truncate(columns);
        payloads.truncate(columns);
        Self {
            shape: [2, columns],
            data: [timestamps, payloads],
        }
    }

    /// Data flattened row-major.
    pub fn flat(&self) -> Vec<i64> {
        self.data.concat()
    }
}

/// Group node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Scalar attributes.
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
    /// Child groups.
    #[serde(default)]
    pub groups: BTreeMap<String, Group>,
    /// Datasets.
    #[serde(default)]
    pub datasets: BTreeMap<String, Dataset>,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl Group {
    /// Empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, replacing any previous value.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(name.into(), value.into());
    }

    /// Attribute by name.
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// Add or replace a dataset.
    pub fn set_dataset(&mut self, name: impl Into<String>, dataset: Dataset) {
        self.datasets.insert(name.into(), dataset);
    }

    /// Dataset by name.
    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    /// Descendant group at `path`.
    pub fn get(&self, path: &str) -> Option<&Group> {
        segments(path).try_fold(self, |group, name| group.groups.get(name))
    }

    /// Descendant group at `path`, creating missing levels.
    pub fn get_or_create(&mut self, path: &str) -> &mut Group {
        segments(path).fold(self, |group, name| {
            group.groups.entry(name.to_string()).or_default()
        })
    }

    /// Whether a group exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Replace the subtree at `path` with `group`.
    pub fn replace(&mut self, path: &str, group: Group) {
        *self.get_or_create(path) = group;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_create_intermediate_groups() {
        let mut root = Group::new();
        root.get_or_create("mouse1/2024-05-01/behavior")
            .set_attr("notes", "ok");

        assert!(root.contains("mouse1"));
        assert!(root.contains("mouse1/2024-05-01"));
        assert_eq!(
            root.get("mouse1/2024-05-01/behavior")
                .and_then(|g| g.attr("notes")),
            Some(&AttrValue::Text("ok".into()))
        );
        assert!(!root.contains("mouse2"));
    }

    #[test]
    fn replace_drops_previous_subtree() {
        let mut root = Group::new();
        root.get_or_create("a/b").set_attr("x", 1);
        let mut fresh = Group::new();
        fresh.set_attr("y", 2);
        root.replace("a", fresh);

        assert!(!root.contains("a/b"));
        assert_eq!(root.get("a").and_then(|g| g.attr("y")), Some(&AttrValue::Int(2)));
    }

    #[test]
    fn optional_values_become_null() {
        assert_eq!(AttrValue::from(None::<i64>), AttrValue::Null);
        assert_eq!(AttrValue::from(Some(7_i64)), AttrValue::Int(7));
    }

    #[test]
    fn json_shape_is_plain() {
        let mut group = Group::new();
        group.set_attr("arduino_end", None::<i64>);
        group.set_attr("truncated", false);
        group.set_dataset("lick", Dataset::from_rows(vec![1, 2], vec![1, 0]));

        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(json["attrs"]["arduino_end"], serde_json::Value::Null);
        assert_eq!(json["attrs"]["truncated"], serde_json::Value::Bool(false));
        assert_eq!(json["datasets"]["lick"]["shape"], serde_json::json!([2, 2]));

        let back: Group = serde_json::from_value(json).unwrap();
        assert_eq!(back, group);
    }
}
