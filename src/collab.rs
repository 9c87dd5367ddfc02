//! The narrow traits the editor consumes from its external collaborators.
//!
//! Every trait here is crate-internal production surface: the filesystem-backed
//! implementations in [`crate::fs_collab`] are what a real checkout uses, and tests
//! substitute the same traits with in-memory fakes to exercise the editor without
//! touching disk.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use camino::{Utf8Path, Utf8PathBuf};

use crate::cancel::Cancellation;
use crate::entry::EntryMap;
use crate::error::Result;
use crate::log::LogCommand;
use crate::notify::State;

/// Reads and writes a directory's entries table as an atomic unit.
pub trait EntriesStore {
    /// Read the full entries map for `dir`.
    fn read(&self, dir: &Utf8Path) -> Result<EntryMap>;

    /// Atomically replace `dir`'s entries map.
    fn write(&self, dir: &Utf8Path, map: &EntryMap) -> Result<()>;
}

/// Opens/derives paths for a file's pristine text-base.
pub trait PristineStore {
    /// The path a file's text-base (or, if `tmp`, its staging copy) lives at. Purely
    /// a path-derivation helper; callers open it themselves via [`Self::open_read`]
    /// / [`Self::open_write_tmp`].
    fn text_base_path(&self, file: &Utf8Path, tmp: bool) -> Utf8PathBuf;

    /// Open the current (non-tmp) text-base for reading. `Ok(None)` means no
    /// text-base exists yet, which signals a brand-new file rather than an error.
    fn open_read(&self, file: &Utf8Path) -> std::io::Result<Option<Box<dyn Read>>>;

    /// Open (creating/truncating) the tmp text-base for writing.
    fn open_write_tmp(&self, file: &Utf8Path) -> std::io::Result<Box<dyn Write>>;

    /// Remove a tmp text-base, e.g. after a failed delta application. Tolerates the
    /// file already being gone.
    fn remove_tmp(&self, file: &Utf8Path) -> std::io::Result<()>;
}

/// Loads and persists a directory's pristine (last-known-versioned) regular
/// property list for a given entry name.
///
/// Regular props are, unlike entry-props and wc-props, not named in the log-verb
/// vocabulary below; this crate writes them directly rather than inventing a log verb
/// for them (see DESIGN.md's note on this open question).
pub trait PropsStore {
    /// Load the pristine regular-prop map for `name` within `dir` (empty if none
    /// recorded yet).
    fn load(&self, dir: &Utf8Path, name: &str) -> Result<BTreeMap<String, String>>;

    /// Atomically replace the pristine regular-prop map for `name` within `dir`.
    fn store(&self, dir: &Utf8Path, name: &str, props: &BTreeMap<String, String>) -> Result<()>;
}

/// The content/prop conflict state observed for one or more entries during a single
/// log replay, keyed by entry name.
#[derive(Debug, Default, Clone)]
pub struct ReplayOutcome {
    /// Per-entry content state (text merge/conflict result).
    pub content_state: BTreeMap<String, State>,
    /// Per-entry property state.
    pub prop_state: BTreeMap<String, State>,
}

impl ReplayOutcome {
    /// The content state recorded for `name`, or [`State::Unchanged`] if none was.
    pub fn content_state_of(&self, name: &str) -> State {
        self.content_state.get(name).copied().unwrap_or(State::Unchanged)
    }

    /// The prop state recorded for `name`, or [`State::Unchanged`] if none was.
    pub fn prop_state_of(&self, name: &str) -> State {
        self.prop_state.get(name).copied().unwrap_or(State::Unchanged)
    }
}

/// Replays a flushed per-directory log against the working copy.
///
/// Implementations must be **atomic from the user's viewpoint** (either every
/// command succeeds and the log file is removed, or a retry is possible),
/// **order-preserving**, and **idempotent** under partial application.
pub trait LogRunner {
    /// Flush `commands` to `dir`'s log file and replay it to completion, returning
    /// the conflict probe `install_file` needs to compute notification states.
    fn run_log(&self, dir: &Utf8Path, commands: &[LogCommand], cancel: &Cancellation) -> Result<ReplayOutcome>;

    /// Replay any log file left over from a prior, interrupted run against `dir`.
    /// A no-op if there is nothing to resume. This is the crash-recovery entry point:
    /// calling it again after a successful edit is always safe.
    fn resume(&self, dir: &Utf8Path, cancel: &Cancellation) -> Result<()>;
}

/// True if removing the working file at `path` would discard local modifications
/// the editor must not silently lose — i.e. the locally-modified check used by
/// `delete_entry` and `install_file` step 5.
pub trait LocalModsProbe {
    /// `true` if `path`'s working content or properties differ from its text-base.
    fn has_local_mods(&self, path: &Utf8Path) -> Result<bool>;

    /// `true` if a working file is present on disk at `path`.
    fn working_exists(&self, path: &Utf8Path) -> Result<bool>;

    /// `true` if `dir`'s working (regular) properties have been modified outside
    /// of the running edit since they were last recorded pristine — the
    /// directory analogue of `has_local_mods`, used to gate the prop-time stamp
    /// in `close_directory`.
    fn has_local_dir_prop_mods(&self, dir: &Utf8Path) -> Result<bool>;
}
