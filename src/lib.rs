//! A crash-safe working-copy update editor.
//!
//! This crate consumes a stream of tree-delta callbacks describing a new repository
//! revision — `set_target_revision`, `open_root`, `add_directory`/`open_directory`,
//! `add_file`/`open_file`, `apply_textdelta`, `change_*_prop`, `close_directory`,
//! `close_file`, `close_edit` — invoked by an external driver in a strictly nested,
//! depth-first order, and integrates those changes into a local, on-disk working
//! copy while preserving any uncommitted local modifications.
//!
//! The pieces, leaves first:
//!
//! - [`collab`] names the narrow traits the editor consumes from its external
//!   collaborators (entries store, pristine store, log runner, local-mods probe);
//!   [`fs_collab`] is the `cap_std`-sandboxed filesystem-backed implementation of
//!   all four.
//! - [`log`] is the per-directory journal: commands, their wire encoding, and the
//!   in-memory buffer that accumulates them before a flush.
//! - [`delta`] applies a text-delta window stream against a file's text-base,
//!   tracking a running MD5 digest.
//! - [`install`] is `install_file`, the integration core that turns an applied
//!   text-delta plus pending property changes into a single replayed log.
//! - [`bump`] is the reference-counted directory completion tracker.
//! - [`editor`] is the callback surface itself ([`editor::TreeDeltaEditor`]) and its
//!   implementation ([`editor::UpdateEditor`]).
//! - [`anchor`] resolves a user-supplied path into the (anchor, target) pair an edit
//!   is rooted at.
//!
//! Ambient concerns live alongside: [`error`] is the crate's error type, [`config`]
//! is the builder that assembles an edit's parameters, [`notify`] is the
//! driver-facing progress sink, [`cancel`] is the cooperative cancellation signal.

pub mod anchor;
pub mod bump;
pub mod cancel;
pub mod collab;
pub mod config;
pub mod delta;
pub mod entry;
pub mod error;
pub mod editor;
pub mod fs_collab;
pub mod install;
pub mod log;
pub mod merge;
pub mod notify;
pub mod props;
pub mod state;

pub use config::{UpdateParams, UpdateParamsBuilder};
pub use editor::{DirToken, FileToken, TextDeltaHandle, TreeDeltaEditor, UpdateEditor};
pub use error::{EditorError, Result};
pub use state::EditContext;
