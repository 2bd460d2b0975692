//! Typed attribute bags for discovered resources.
//!
//! Remote objects arrive from the collaborator boundary already extracted
//! into an `Attrs` map; nothing untyped passes beyond that point.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl AttrValue {
    /// Integer view; numeric strings parse, booleans do not.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Str(s) => s.trim().parse().ok(),
            AttrValue::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(v) => write!(f, "{}", v),
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

/// Attribute bag keyed by property name.
pub type Attrs = BTreeMap<String, AttrValue>;

pub fn get_str<'a>(attrs: &'a Attrs, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(|v| v.as_str())
}

pub fn get_int(attrs: &Attrs, key: &str) -> Option<i64> {
    attrs.get(key).and_then(|v| v.as_int())
}

/// Keys from `check_list` whose values differ between `local` and `remote`.
///
/// A key present on one side only counts as changed. Keys in `int_keys`
/// compare as integers (an unparsable value never equals a parsable one);
/// everything else compares by normalized string form.
pub fn changed_keys(
    local: &Attrs,
    remote: &Attrs,
    check_list: &[&str],
    int_keys: &[&str],
) -> Vec<String> {
    let mut changed = Vec::new();
    for key in check_list {
        let old = local.get(*key);
        let new = remote.get(*key);
        let differs = match (old, new) {
            (None, None) => false,
            (Some(old), Some(new)) => {
                if int_keys.contains(key) {
                    old.as_int() != new.as_int()
                } else {
                    old.to_string() != new.to_string()
                }
            }
            _ => true,
        };
        if differs {
            changed.push((*key).to_string());
        }
    }
    changed
}

/// True when any key in `check_list` differs.
pub fn has_changes(local: &Attrs, remote: &Attrs, check_list: &[&str], int_keys: &[&str]) -> bool {
    !changed_keys(local, remote, check_list, int_keys).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attrs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_int_keys_compare_numerically() {
        let local = attrs(&[("size", AttrValue::Str("1024".into()))]);
        let remote = attrs(&[("size", AttrValue::Int(1024))]);
        assert!(!has_changes(&local, &remote, &["size"], &["size"]));

        let remote = attrs(&[("size", AttrValue::Int(2048))]);
        assert_eq!(changed_keys(&local, &remote, &["size"], &["size"]), ["size"]);
    }

    #[test]
    fn test_string_keys_compare_normalized() {
        let local = attrs(&[("ostype", "centos6".into())]);
        let remote = attrs(&[("ostype", "centos7".into())]);
        assert!(has_changes(&local, &remote, &["ostype"], &[]));

        let remote = attrs(&[("ostype", "centos6".into())]);
        assert!(!has_changes(&local, &remote, &["ostype"], &[]));
    }

    #[test]
    fn test_presence_change_counts() {
        let local = attrs(&[]);
        let remote = attrs(&[("path", "/a/b".into())]);
        assert!(has_changes(&local, &remote, &["path"], &[]));
        assert!(has_changes(&remote, &local, &["path"], &[]));
    }

    #[test]
    fn test_keys_outside_check_list_ignored() {
        let local = attrs(&[("extra", "1".into())]);
        let remote = attrs(&[("extra", "2".into())]);
        assert!(!has_changes(&local, &remote, &["size"], &[]));
    }

    #[test]
    fn test_attrs_json_roundtrip() {
        let a = attrs(&[
            ("name", "tpl".into()),
            ("size", AttrValue::Int(42)),
            ("template", AttrValue::Bool(true)),
        ]);
        let json = serde_json::to_string(&a).unwrap();
        let back: Attrs = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
