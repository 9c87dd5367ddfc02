//! In-memory per-edit, per-directory, and per-file state.
//!
//! These types hold exactly the per-edit, per-directory, and per-file fields the
//! editor's callback protocol needs to carry between calls. There is no
//! arena allocator; per-directory/per-file state is owned by the callback that
//! creates it and simply dropped at `close_directory`/`close_file`, which is what
//! "arena release" becomes once the borrow checker is doing the bookkeeping.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::bump::{BumpInfo, BumpInfoHandle};
use crate::cancel::Cancellation;
use crate::notify::NotificationSink;
use crate::props::PropertyChange;

/// The pair of externals-property maps the traversal-info collector accumulates
/// Keyed by directory path.
#[derive(Debug, Default)]
pub struct TraversalInfo {
    /// Observed `svn:externals`-equivalent values before the edit touched them.
    pub externals_old: RefCell<std::collections::BTreeMap<Utf8PathBuf, String>>,
    /// Observed values after the edit touched them.
    pub externals_new: RefCell<std::collections::BTreeMap<Utf8PathBuf, String>>,
}

impl TraversalInfo {
    /// Record an externals-property change observed during `close_directory`.
    pub fn record(&self, dir: &Utf8Path, old: Option<&str>, new: Option<&str>) {
        if let Some(old) = old {
            self.externals_old
                .borrow_mut()
                .insert(dir.to_path_buf(), old.to_string());
        }
        if let Some(new) = new {
            self.externals_new
                .borrow_mut()
                .insert(dir.to_path_buf(), new.to_string());
        }
    }
}

/// State shared across the whole edit, built once by the driver and threaded through
/// every callback.
pub struct EditContext {
    /// The directory the edit is rooted at.
    pub anchor: Utf8PathBuf,
    /// The basename within `anchor` the edit is restricted to, if any.
    pub target: Option<String>,
    /// The revision the driver is updating to.
    pub target_revision: Cell<u64>,
    /// Whether to recurse into subdirectories (a non-recursive edit only touches
    /// the anchor/target's immediate entry).
    pub recurse: bool,
    /// Whether to stamp working-file mtimes from the `committed_date` entry-prop
    /// instead of from wall-clock "now".
    pub use_commit_times: bool,
    /// Present for a *switch* edit: the new base URL entries should be rewritten to.
    pub switch_url: Option<String>,
    /// Optional path to an external `diff3`-compatible binary.
    pub diff3_cmd: Option<Utf8PathBuf>,
    /// Where notifications are reported.
    pub notify: Box<dyn NotificationSink>,
    /// The cancellation signal, checked by delegated long-running operations.
    pub cancel: Cancellation,
    /// Accumulates before/after externals-property values.
    pub traversal_info: TraversalInfo,
    /// Set once `open_root` has run.
    pub root_opened: Cell<bool>,
    /// Set once `delete_entry` has been called on the edit's target.
    pub target_deleted: Cell<bool>,
}

impl EditContext {
    /// Build a fresh edit context. `target_revision` is filled in later by
    /// `set_target_revision`, which must run before `open_root`.
    pub fn new(
        anchor: Utf8PathBuf,
        target: Option<String>,
        recurse: bool,
        use_commit_times: bool,
        switch_url: Option<String>,
        diff3_cmd: Option<Utf8PathBuf>,
        notify: Box<dyn NotificationSink>,
        cancel: Cancellation,
    ) -> Self {
        Self {
            anchor,
            target,
            target_revision: Cell::new(0),
            recurse,
            use_commit_times,
            switch_url,
            diff3_cmd,
            notify,
            cancel,
            traversal_info: TraversalInfo::default(),
            root_opened: Cell::new(false),
            target_deleted: Cell::new(false),
        }
    }

    /// `true` if this edit is a switch (the URL of affected entries changes too).
    pub fn is_switch(&self) -> bool {
        self.switch_url.is_some()
    }
}

/// Per-directory state, live from `open_directory`/`add_directory`/`open_root`
/// through `close_directory`.
pub struct DirState {
    /// Absolute (anchor-relative) path of this directory.
    pub path: Utf8PathBuf,
    /// This directory's basename.
    pub basename: String,
    /// This directory's URL after the edit.
    pub url: String,
    /// Parent directory's state, or `None` for the root.
    pub parent: Option<Rc<DirState>>,
    /// Whether this directory was newly added by this edit (`add_directory`) as
    /// opposed to already versioned (`open_directory`).
    pub added: bool,
    /// Property changes accumulated via `change_dir_prop`.
    pub prop_changes: RefCell<Vec<PropertyChange>>,
    /// This directory's completion tracker.
    pub bump: BumpInfoHandle,
}

impl DirState {
    /// Build state for a newly entered directory, wiring up its `BumpInfo` against
    /// the parent's (incrementing the parent's refcount by one).
    pub fn new_root(path: Utf8PathBuf, url: String, added: bool) -> Rc<DirState> {
        let bump = BumpInfo::new(path.clone(), None);
        Rc::new(DirState {
            basename: path.file_name().unwrap_or("").to_string(),
            path,
            url,
            parent: None,
            added,
            prop_changes: RefCell::new(Vec::new()),
            bump,
        })
    }

    /// Build state for a directory entered under `parent`.
    pub fn new_child(parent: &Rc<DirState>, basename: &str, url: String, added: bool) -> Rc<DirState> {
        BumpInfo::add_ref(&parent.bump);
        let path = parent.path.join(basename);
        let bump = BumpInfo::new(path.clone(), Some(parent.bump.clone()));
        Rc::new(DirState {
            path,
            basename: basename.to_string(),
            url,
            parent: Some(parent.clone()),
            added,
            prop_changes: RefCell::new(Vec::new()),
            bump,
        })
    }
}

/// Per-file state, live from `add_file`/`open_file` through `close_file`.
pub struct FileState {
    /// Absolute (anchor-relative) path of this file.
    pub path: Utf8PathBuf,
    /// This file's basename.
    pub basename: String,
    /// This file's URL after the edit.
    pub url: String,
    /// Whether this file was newly added (`add_file`) as opposed to already
    /// versioned (`open_file`).
    pub added: bool,
    /// Set iff the text-delta window stream yielded at least one window that was
    /// fully consumed without error.
    pub text_changed: Cell<bool>,
    /// Set iff `change_file_prop` was called at least once.
    pub prop_changed: Cell<bool>,
    /// Property changes accumulated via `change_file_prop`.
    pub prop_changes: RefCell<Vec<PropertyChange>>,
    /// Cached `committed_date` entry-prop value, if the edit opts into
    /// `use_commit_times`.
    pub last_changed_date: RefCell<Option<String>>,
    /// Hex MD5 digest of the reconstructed full text, finalized when the window
    /// stream hits end-of-stream.
    pub text_md5: RefCell<Option<String>>,
    /// The owning directory's completion tracker.
    pub dir_bump: BumpInfoHandle,
}

impl FileState {
    /// Build state for a file entered under `parent`, bumping the parent's refcount.
    pub fn new(parent: &Rc<DirState>, basename: &str, url: String, added: bool) -> FileState {
        BumpInfo::add_ref(&parent.bump);
        FileState {
            path: parent.path.join(basename),
            basename: basename.to_string(),
            url,
            added,
            text_changed: Cell::new(false),
            prop_changed: Cell::new(false),
            prop_changes: RefCell::new(Vec::new()),
            last_changed_date: RefCell::new(None),
            text_md5: RefCell::new(None),
            dir_bump: parent.bump.clone(),
        }
    }
}
