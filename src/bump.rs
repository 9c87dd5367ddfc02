//! The reference-counted directory "bump" mechanism.
//!
//! A [`BumpInfo`] is allocated once per directory entered during an edit and outlives
//! that directory's [`crate::state::DirState`]. Its reference count starts at 1 (for
//! the directory itself) and is incremented once per child directory and once per
//! child file entered. Closing a child, or closing the directory itself, decrements
//! the count; reaching zero triggers completion, which recurses up through `parent`.
//!
//! Modeled with `Rc<RefCell<..>>` child->parent edges only, per the no-cycle
//! requirement: a `BumpInfo` never holds a strong reference down to its children.

use std::cell::RefCell;
use std::rc::Rc;

use camino::Utf8PathBuf;

/// A shared handle to one directory's bump-tracking state.
pub type BumpInfoHandle = Rc<RefCell<BumpInfo>>;

/// Reference-counted completion tracker for one directory.
pub struct BumpInfo {
    /// The directory this tracker belongs to.
    pub path: Utf8PathBuf,
    /// Parent directory's tracker, or `None` for the edit root.
    pub parent: Option<BumpInfoHandle>,
    /// Number of "things" still keeping this directory open: 1 for the directory
    /// itself, plus 1 per open child directory, plus 1 per open child file.
    refcount: u32,
}

impl BumpInfo {
    /// Allocate a new tracker for `path`, seeded with a refcount of 1.
    pub fn new(path: Utf8PathBuf, parent: Option<BumpInfoHandle>) -> BumpInfoHandle {
        Rc::new(RefCell::new(BumpInfo {
            path,
            parent,
            refcount: 1,
        }))
    }

    /// Register one more outstanding child (directory or file) under this directory.
    pub fn add_ref(handle: &BumpInfoHandle) {
        handle.borrow_mut().refcount += 1;
    }

    /// The current reference count. Exposed for tests and invariant assertions.
    pub fn refcount(handle: &BumpInfoHandle) -> u32 {
        handle.borrow().refcount
    }
}

/// Decrement `handle`'s refcount by one. If it reaches zero, `on_complete` is invoked
/// with the directory's path, and the decrement recurses to the parent (since this
/// directory itself was one "thing" keeping its parent open).
///
/// Returns the list of directory paths that became complete as a result of this single
/// bump, in completion order (deepest first).
pub fn bump<F: FnMut(&Utf8PathBuf)>(handle: &BumpInfoHandle, mut on_complete: F) -> Vec<Utf8PathBuf> {
    let mut completed = Vec::new();
    let mut current = Some(handle.clone());
    while let Some(node) = current {
        let (reached_zero, path, parent) = {
            let mut b = node.borrow_mut();
            debug_assert!(b.refcount > 0, "bump underflow at {}", b.path);
            b.refcount -= 1;
            (b.refcount == 0, b.path.clone(), b.parent.clone())
        };
        if !reached_zero {
            break;
        }
        on_complete(&path);
        completed.push(path);
        current = parent;
    }
    completed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_directory_completes_on_own_close() {
        let root = BumpInfo::new("".into(), None);
        let mut seen = Vec::new();
        let completed = bump(&root, |p| seen.push(p.clone()));
        assert_eq!(completed, vec![Utf8PathBuf::from("")]);
        assert_eq!(seen, vec![Utf8PathBuf::from("")]);
    }

    #[test]
    fn parent_only_completes_after_every_child() {
        let root = BumpInfo::new("".into(), None);
        let child = BumpInfo::new("a".into(), Some(root.clone()));
        BumpInfo::add_ref(&root); // child directory entered

        let file = Rc::clone(&child);
        BumpInfo::add_ref(&file); // a file entered under "a"

        // Closing the file first: child's refcount goes 2 -> 1, nothing completes.
        assert!(bump(&child, |_| panic!("should not complete yet")).is_empty());
        assert_eq!(BumpInfo::refcount(&child), 1);

        // Closing the directory "a" itself: child -> 0, completes, and bumps root.
        let completed = bump(&child, |_| {});
        assert_eq!(completed, vec![Utf8PathBuf::from("a")]);
        // Root still has its own +1 from being entered, minus nothing yet.
        assert_eq!(BumpInfo::refcount(&root), 1);

        // Closing root itself completes it too.
        let completed = bump(&root, |_| {});
        assert_eq!(completed, vec![Utf8PathBuf::from("")]);
    }

    #[test]
    fn out_of_order_file_completion_still_completes_exactly_once() {
        let root = BumpInfo::new("".into(), None);
        BumpInfo::add_ref(&root); // one file entered, in postfix-delta order
        BumpInfo::add_ref(&root); // a second file entered

        assert!(bump(&root, |_| panic!("premature")).is_empty());
        assert!(bump(&root, |_| panic!("premature")).is_empty());
        let completed = bump(&root, |_| {});
        assert_eq!(completed, vec![Utf8PathBuf::from("")]);
    }
}
