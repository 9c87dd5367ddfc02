//! The versioned-entry record and the entries-table map type.
//!
//! One [`Entry`] describes a single versioned name within a directory. The editor never
//! invents fields beyond what the collaborator contract below requires; a production
//! entries store is free to carry more (locks, depth, tree-conflict markers, ...).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What kind of object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    /// A regular versioned file.
    File,
    /// A versioned directory.
    Dir,
}

/// The scheduling state of an entry, independent of its on-disk presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    /// No pending local schedule change.
    Normal,
    /// Scheduled to be added at the next commit.
    Add,
    /// Scheduled to be deleted at the next commit.
    Delete,
}

/// One row of a directory's entries table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// File or directory.
    pub kind: Kind,
    /// The revision this entry is recorded at.
    pub revision: u64,
    /// The entry's repository URL.
    pub url: String,
    /// Local scheduling state.
    pub schedule: Schedule,
    /// Set when this entry is a tombstone: the name was deleted server-side and the
    /// parent is keeping a record of it (e.g. so a future `close_edit` can tell the
    /// difference between "never existed" and "existed, now gone").
    pub deleted: bool,
    /// Set between `open_directory`/`add_directory`/`open_root` and the matching
    /// `complete_directory`. Only meaningful for `Kind::Dir` entries, but stored
    /// uniformly for simplicity.
    pub incomplete: bool,
    /// The stored checksum of the file's pristine text-base, if any (files only).
    pub checksum: Option<String>,
    /// Last-recorded mtime of the working text, used to detect local modifications
    /// cheaply (a changed mtime triggers a full content comparison upstream).
    pub text_time: Option<String>,
    /// Last-recorded mtime of the working properties.
    pub prop_time: Option<String>,
    /// If this entry was copied, the URL it was copied from.
    pub copyfrom_url: Option<String>,
    /// If this entry was copied, the revision it was copied from.
    pub copyfrom_rev: Option<u64>,
    /// Last commit author (entry-prop `last_author`).
    pub committed_author: Option<String>,
    /// Last commit revision (entry-prop `committed_rev`).
    pub committed_rev: Option<u64>,
    /// Last commit date (entry-prop `committed_date`).
    pub committed_date: Option<String>,
    /// Repository UUID (entry-prop `uuid`).
    pub uuid: Option<String>,
}

impl Entry {
    /// A freshly scheduled-for-add entry with otherwise-empty metadata.
    pub fn new_add(kind: Kind, url: impl Into<String>) -> Self {
        Self {
            kind,
            revision: 0,
            url: url.into(),
            schedule: Schedule::Add,
            deleted: false,
            incomplete: kind == Kind::Dir,
            checksum: None,
            text_time: None,
            prop_time: None,
            copyfrom_url: None,
            copyfrom_rev: None,
            committed_author: None,
            committed_rev: None,
            committed_date: None,
            uuid: None,
        }
    }

    /// A tombstone entry: the name is gone, but callers need to remember it was here.
    pub fn new_tombstone(kind: Kind, revision: u64) -> Self {
        Self {
            kind,
            revision,
            url: String::new(),
            schedule: Schedule::Normal,
            deleted: true,
            incomplete: false,
            checksum: None,
            text_time: None,
            prop_time: None,
            copyfrom_url: None,
            copyfrom_rev: None,
            committed_author: None,
            committed_rev: None,
            committed_date: None,
            uuid: None,
        }
    }
}

/// A directory's entries table: versioned name -> entry. `""` is reserved for the
/// special "this directory" entry that carries the directory's own metadata.
pub type EntryMap = BTreeMap<String, Entry>;

/// The reserved name of the "this directory" self-entry inside an entries table.
pub const THIS_DIR: &str = "";
