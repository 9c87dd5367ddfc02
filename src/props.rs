//! Property change records and the regular/entry/wc classification.

use serde::{Deserialize, Serialize};

/// A single property change. A `None` value is a tombstone: the property is being
/// removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// The property name, e.g. `svn:executable` or `committed-rev`.
    pub name: String,
    /// The new value, or `None` to delete the property.
    pub value: Option<String>,
}

impl PropertyChange {
    /// Build a change that sets `name` to `value`.
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Build a tombstone change for `name`.
    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// `true` for a tombstone (value-less) change.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// The three disjoint namespaces a property change can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropNamespace {
    /// User-visible, versioned properties (most properties).
    Regular,
    /// Synthetic fields that update the entries table rather than a prop file.
    Entry,
    /// Working-copy-only properties, never versioned.
    Wc,
}

/// Properties whose change forces retranslation of the working file even when the
/// file's text itself didn't change.
pub const MAGIC_PROPS: &[&str] = &["executable", "keywords", "eol-style"];

/// `true` if `name` is one of [`MAGIC_PROPS`].
pub fn is_magic_prop(name: &str) -> bool {
    MAGIC_PROPS.contains(&name)
}

/// Entry-props: synthetic property names that, instead of being versioned, update a
/// field directly on the entries-table row. Returns the entries-table field name an
/// entry-prop maps to.
pub fn entry_prop_field(name: &str) -> Option<&'static str> {
    match name {
        "last_author" => Some("cmt_author"),
        "committed_rev" => Some("cmt_rev"),
        "committed_date" => Some("cmt_date"),
        "uuid" => Some("uuid"),
        _ => None,
    }
}

/// Working-copy-only properties, recognized by a leading `wc:` prefix convention.
fn is_wc_prop(name: &str) -> bool {
    name.starts_with("wc:")
}

/// Classify a property name into its namespace.
///
/// Entry-props are checked first (they're a small, fixed set), then wc-props (by
/// naming convention), and everything else is regular.
pub fn classify(name: &str) -> PropNamespace {
    if entry_prop_field(name).is_some() {
        PropNamespace::Entry
    } else if is_wc_prop(name) {
        PropNamespace::Wc
    } else {
        PropNamespace::Regular
    }
}

/// Partition a list of property changes into (regular, entry, wc) buckets, preserving
/// the relative order within each bucket.
pub fn partition(changes: &[PropertyChange]) -> (Vec<PropertyChange>, Vec<PropertyChange>, Vec<PropertyChange>) {
    let mut regular = Vec::new();
    let mut entry = Vec::new();
    let mut wc = Vec::new();
    for change in changes {
        match classify(&change.name) {
            PropNamespace::Regular => regular.push(change.clone()),
            PropNamespace::Entry => entry.push(change.clone()),
            PropNamespace::Wc => wc.push(change.clone()),
        }
    }
    (regular, entry, wc)
}

/// `true` if any regular-prop change in `changes` is one of [`MAGIC_PROPS`].
pub fn any_magic_prop_changed(changes: &[PropertyChange]) -> bool {
    changes.iter().any(|c| is_magic_prop(&c.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_entry_props() {
        assert_eq!(classify("committed_rev"), PropNamespace::Entry);
        assert_eq!(classify("uuid"), PropNamespace::Entry);
    }

    #[test]
    fn classifies_wc_props() {
        assert_eq!(classify("wc:ra_dav:version-url"), PropNamespace::Wc);
    }

    #[test]
    fn classifies_regular_props() {
        assert_eq!(classify("svn:externals"), PropNamespace::Regular);
        assert_eq!(classify("executable"), PropNamespace::Regular);
    }

    #[test]
    fn partition_preserves_order() {
        let changes = vec![
            PropertyChange::set("svn:externals", "x"),
            PropertyChange::set("committed_rev", "4"),
            PropertyChange::set("wc:ra_dav:version-url", "/v"),
            PropertyChange::set("executable", "*"),
        ];
        let (regular, entry, wc) = partition(&changes);
        assert_eq!(regular.len(), 2);
        assert_eq!(entry.len(), 1);
        assert_eq!(wc.len(), 1);
        assert!(any_magic_prop_changed(&regular));
    }
}
