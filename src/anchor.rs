//! The anchor/target resolver: decides where to root an edit and what
//! basename, if any, to restrict it to.

use camino::{Utf8Path, Utf8PathBuf};

use crate::entry::Kind;
use crate::error::{EditorError, Result};

/// What the resolver needs to know about a path that may or may not be versioned.
///
/// A `None` return from [`WcLookup::lookup`] means "no entry recorded here at all",
/// treated as "this path is a root" rather than an error: you can't be
/// obstructed by metadata that doesn't exist.
pub trait WcLookup {
    /// Look up the kind and recorded URL of a path, if it is versioned.
    fn lookup(&self, path: &Utf8Path) -> Option<(Kind, Option<String>)>;
}

fn dirname(path: &Utf8Path) -> Utf8PathBuf {
    path.parent().unwrap_or_else(|| Utf8Path::new("")).to_path_buf()
}

fn basename(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or("")
}

/// `true` if `path` is itself a working-copy root: its recorded URL does not equal
/// `parent(path).url / basename(path)`.
fn is_wc_root(path: &Utf8Path, lookup: &dyn WcLookup) -> Result<bool> {
    if path.as_str().is_empty() {
        return Ok(true);
    }
    let parent = dirname(path);
    let (_, parent_url) = match lookup.lookup(&parent) {
        None => return Ok(true),
        Some(info) => info,
    };
    let parent_url = parent_url.ok_or_else(|| EditorError::EntryMissingUrl(parent.clone()))?;

    let own_url = match lookup.lookup(path) {
        Some((_, Some(url))) => url,
        // No recorded URL for this path (or no entry at all): nothing to compare
        // against, so treat it conservatively as its own root.
        _ => return Ok(true),
    };

    let expected = format!("{parent_url}/{}", basename(path));
    Ok(own_url != expected)
}

/// Resolve `path` into an (anchor, target) pair.
pub fn resolve(path: &Utf8Path, lookup: &dyn WcLookup) -> Result<(Utf8PathBuf, Option<String>)> {
    if path.as_str().is_empty() {
        return Ok((Utf8PathBuf::from(""), None));
    }
    let is_dir = matches!(lookup.lookup(path), Some((Kind::Dir, _)));
    if is_dir && is_wc_root(path, lookup)? {
        return Ok((path.to_path_buf(), None));
    }
    Ok((dirname(path), Some(basename(path).to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeWc(HashMap<String, (Kind, Option<String>)>);

    impl WcLookup for FakeWc {
        fn lookup(&self, path: &Utf8Path) -> Option<(Kind, Option<String>)> {
            self.0.get(path.as_str()).cloned()
        }
    }

    #[test]
    fn empty_path_is_always_root() {
        let wc = FakeWc(HashMap::new());
        let (anchor, target) = resolve(Utf8Path::new(""), &wc).unwrap();
        assert_eq!(anchor, "");
        assert_eq!(target, None);
    }

    #[test]
    fn child_whose_url_matches_parent_is_not_its_own_root() {
        let mut m = HashMap::new();
        m.insert("foo".to_string(), (Kind::Dir, Some("https://example/repo/foo".into())));
        m.insert(
            "foo/bar".to_string(),
            (Kind::Dir, Some("https://example/repo/foo/bar".into())),
        );
        let wc = FakeWc(m);
        let (anchor, target) = resolve(Utf8Path::new("foo/bar"), &wc).unwrap();
        assert_eq!(anchor, "foo");
        assert_eq!(target.as_deref(), Some("bar"));
    }

    #[test]
    fn child_whose_url_diverges_is_its_own_root() {
        let mut m = HashMap::new();
        m.insert("foo".to_string(), (Kind::Dir, Some("https://example/repo/foo".into())));
        m.insert(
            "foo/bar".to_string(),
            (Kind::Dir, Some("https://other/switched-repo".into())),
        );
        let wc = FakeWc(m);
        let (anchor, target) = resolve(Utf8Path::new("foo/bar"), &wc).unwrap();
        assert_eq!(anchor, "foo/bar");
        assert_eq!(target, None);
    }

    #[test]
    fn file_target_always_splits_off_basename() {
        let mut m = HashMap::new();
        m.insert("foo".to_string(), (Kind::Dir, Some("https://example/repo/foo".into())));
        m.insert(
            "foo/hello.txt".to_string(),
            (Kind::File, Some("https://example/repo/foo/hello.txt".into())),
        );
        let wc = FakeWc(m);
        let (anchor, target) = resolve(Utf8Path::new("foo/hello.txt"), &wc).unwrap();
        assert_eq!(anchor, "foo");
        assert_eq!(target.as_deref(), Some("hello.txt"));
    }

    #[test]
    fn missing_parent_entry_is_root() {
        let wc = FakeWc(HashMap::new());
        let (anchor, target) = resolve(Utf8Path::new("nonexistent"), &wc).unwrap();
        // `nonexistent` has no entry, so it's not seen as a dir; dirname/basename split applies.
        assert_eq!(anchor, "");
        assert_eq!(target.as_deref(), Some("nonexistent"));
    }

    #[test]
    fn parent_without_url_is_an_error() {
        let mut m = HashMap::new();
        m.insert("foo".to_string(), (Kind::Dir, None));
        m.insert("foo/bar".to_string(), (Kind::Dir, Some("u".into())));
        let wc = FakeWc(m);
        let err = resolve(Utf8Path::new("foo/bar"), &wc).unwrap_err();
        assert!(matches!(err, EditorError::EntryMissingUrl(_)));
    }
}
