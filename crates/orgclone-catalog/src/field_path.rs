//! Field paths into resource payloads
//!
//! A path is a dot-separated list of object keys; a key suffixed with `[]`
//! addresses every element of the array stored under it.
//!
//! ```text
//! name                                  top-level string
//! sitegroup_ids[]                       every string in a top-level array
//! service_policies[].servicepolicy_id   a key inside every array element
//! ```

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Each,
}

/// Parsed path into a JSON payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

/// What to do with one string value found at a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Leave the value untouched
    Keep,
    /// Replace the value
    Replace(String),
    /// Remove the value (the key, or the array element)
    Remove,
}

impl FieldPath {
    /// Parse a path. Empty segments are ignored.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        for part in raw.split('.').filter(|p| !p.is_empty()) {
            match part.strip_suffix("[]") {
                Some(key) => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(key.to_string()));
                    }
                    segments.push(Segment::Each);
                }
                None => segments.push(Segment::Key(part.to_string())),
            }
        }
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    /// The path as written
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the path addresses nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Collect every string value at this path, in document order
    #[must_use]
    pub fn collect(&self, value: &Value) -> Vec<String> {
        let mut out = Vec::new();
        collect_into(value, &self.segments, &mut out);
        out
    }

    /// Apply `edit` to every string value at this path
    pub fn edit<F>(&self, value: &mut Value, edit: &mut F)
    where
        F: FnMut(&str) -> Edit,
    {
        edit_in(value, &self.segments, edit);
    }

    /// Value at a path made only of object keys
    #[must_use]
    pub fn get<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        self.segments.iter().try_fold(value, |current, segment| match segment {
            Segment::Key(key) => current.get(key.as_str()),
            Segment::Each => None,
        })
    }

    /// Mutable value at a path made only of object keys
    pub fn get_mut<'v>(&self, value: &'v mut Value) -> Option<&'v mut Value> {
        self.segments.iter().try_fold(value, |current, segment| match segment {
            Segment::Key(key) => current.get_mut(key.as_str()),
            Segment::Each => None,
        })
    }

    /// Remove whatever is stored at this path. Returns true if anything was removed.
    pub fn remove(&self, value: &mut Value) -> bool {
        remove_in(value, &self.segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

fn collect_into(value: &Value, segments: &[Segment], out: &mut Vec<String>) {
    match segments {
        [] => {
            if let Some(s) = value.as_str() {
                out.push(s.to_string());
            }
        }
        [Segment::Key(key), rest @ ..] => {
            if let Some(child) = value.get(key.as_str()) {
                collect_into(child, rest, out);
            }
        }
        [Segment::Each, rest @ ..] => {
            if let Some(items) = value.as_array() {
                for item in items {
                    collect_into(item, rest, out);
                }
            }
        }
    }
}

fn edit_in<F>(value: &mut Value, segments: &[Segment], edit: &mut F)
where
    F: FnMut(&str) -> Edit,
{
    match segments {
        [] => {}
        [Segment::Key(key)] => {
            let Some(obj) = value.as_object_mut() else {
                return;
            };
            let decision = match obj.get(key.as_str()).and_then(Value::as_str) {
                Some(current) => edit(current),
                None => return,
            };
            match decision {
                Edit::Keep => {}
                Edit::Replace(new) => {
                    obj.insert(key.clone(), Value::String(new));
                }
                Edit::Remove => {
                    obj.remove(key.as_str());
                }
            }
        }
        [Segment::Each] => {
            if let Some(items) = value.as_array_mut() {
                items.retain_mut(|item| {
                    let decision = match item.as_str() {
                        Some(current) => edit(current),
                        None => return true,
                    };
                    match decision {
                        Edit::Keep => true,
                        Edit::Replace(new) => {
                            *item = Value::String(new);
                            true
                        }
                        Edit::Remove => false,
                    }
                });
            }
        }
        [Segment::Key(key), rest @ ..] => {
            if let Some(child) = value.get_mut(key.as_str()) {
                edit_in(child, rest, edit);
            }
        }
        [Segment::Each, rest @ ..] => {
            if let Some(items) = value.as_array_mut() {
                for item in items {
                    edit_in(item, rest, edit);
                }
            }
        }
    }
}

fn remove_in(value: &mut Value, segments: &[Segment]) -> bool {
    match segments {
        [] => false,
        [Segment::Key(key)] => value
            .as_object_mut()
            .is_some_and(|obj| obj.remove(key.as_str()).is_some()),
        [Segment::Each] => match value.as_array_mut() {
            Some(items) if !items.is_empty() => {
                items.clear();
                true
            }
            _ => false,
        },
        [Segment::Key(key), rest @ ..] => value
            .get_mut(key.as_str())
            .is_some_and(|child| remove_in(child, rest)),
        [Segment::Each, rest @ ..] => {
            let mut removed = false;
            if let Some(items) = value.as_array_mut() {
                for item in items {
                    removed |= remove_in(item, rest);
                }
            }
            removed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_nested_array_fields() {
        let payload = json!({
            "service_policies": [
                {"servicepolicy_id": "sp-1", "path_preference": "WAN1"},
                {"action": "allow"},
                {"servicepolicy_id": "sp-2"}
            ]
        });
        let path = FieldPath::parse("service_policies[].servicepolicy_id");
        assert_eq!(path.collect(&payload), vec!["sp-1", "sp-2"]);
    }

    #[test]
    fn edit_replaces_and_removes_array_elements() {
        let mut payload = json!({"sitegroup_ids": ["a", "b", "c"]});
        let path = FieldPath::parse("sitegroup_ids[]");
        path.edit(&mut payload, &mut |id: &str| match id {
            "a" => Edit::Replace("A".into()),
            "b" => Edit::Remove,
            _ => Edit::Keep,
        });
        assert_eq!(payload, json!({"sitegroup_ids": ["A", "c"]}));
    }

    #[test]
    fn edit_removes_scalar_key() {
        let mut payload = json!({"sso_id": "x", "name": "portal"});
        FieldPath::parse("sso_id").edit(&mut payload, &mut |_: &str| Edit::Remove);
        assert_eq!(payload, json!({"name": "portal"}));
    }

    #[test]
    fn remove_reports_whether_anything_was_present() {
        let mut payload = json!({"maps": [{"url": "u"}, {"name": "n"}]});
        assert!(FieldPath::parse("maps[].url").remove(&mut payload));
        assert!(!FieldPath::parse("maps[].url").remove(&mut payload));
        assert!(!FieldPath::parse("missing").remove(&mut payload));
    }

    #[test]
    fn get_walks_keys_but_not_arrays() {
        let payload = json!({"applies": {"org_id": "o1"}, "list": [{"a": "b"}]});
        assert_eq!(FieldPath::parse("applies.org_id").get(&payload), Some(&json!("o1")));
        assert_eq!(FieldPath::parse("list[].a").get(&payload), None);
    }

    #[test]
    fn empty_path_addresses_nothing() {
        let path = FieldPath::parse("..");
        assert!(path.is_empty());
        assert!(path.collect(&json!({"a": "b"})).is_empty());
    }
}
