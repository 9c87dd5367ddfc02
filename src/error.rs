//! Error kinds raised directly by the editor.
//!
//! Collaborators (the entries store, the pristine store, the log runner) are free to
//! return any [`std::io::Error`]; the editor only adds the handful of variants below
//! that callers actually need to distinguish and match on.

use camino::Utf8PathBuf;
use thiserror::Error;

/// The editor's own error type.
#[derive(Debug, Error)]
pub enum EditorError {
    /// A local modification or a name collision prevents a safe mutation.
    #[error("obstructed update at '{path}': {reason}")]
    ObstructedUpdate {
        /// The path the operation targeted.
        path: Utf8PathBuf,
        /// Human-readable cause, e.g. "local modifications" or "already scheduled for add".
        reason: String,
    },

    /// A required entry was missing.
    #[error("entry not found: '{0}'")]
    EntryNotFound(Utf8PathBuf),

    /// A parent entry exists but has no recorded URL.
    #[error("entry '{0}' is missing a URL")]
    EntryMissingUrl(Utf8PathBuf),

    /// `copyfrom` was supplied on `add_directory`, which the source refuses.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    /// The on-disk text-base didn't match the checksum the caller expected.
    #[error("corrupt text base for '{path}': expected checksum {expected}, found {actual}")]
    CorruptTextBase {
        /// The file whose text-base failed verification.
        path: Utf8PathBuf,
        /// The checksum the caller (or the stored entry) expected.
        expected: String,
        /// The checksum actually computed from the on-disk text-base.
        actual: String,
    },

    /// The reconstructed full text didn't match the checksum the driver declared.
    #[error("checksum mismatch for '{path}': driver declared {expected}, reconstructed {actual}")]
    ChecksumMismatch {
        /// The file being closed.
        path: Utf8PathBuf,
        /// The checksum supplied to `close_file`.
        expected: String,
        /// The checksum actually computed while applying the text delta.
        actual: String,
    },

    /// A collaborator reported that local modifications were left behind mid-operation.
    ///
    /// The editor itself only ever surfaces this wrapped as [`EditorError::ObstructedUpdate`];
    /// it's public so a collaborator's test double can construct it.
    #[error("local modifications left behind at '{0}'")]
    LeftLocalMod(Utf8PathBuf),

    /// The cancellation callable reported that the edit should stop.
    #[error("edit cancelled")]
    Cancelled,

    /// A programming error: caller passed incompatible arguments (e.g. one of a
    /// copyfrom_path/copyfrom_rev pair without the other).
    #[error("invalid arguments: {0}")]
    InvalidArguments(&'static str),

    /// Generic I/O failure from a storage collaborator.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure from the JSON-backed entries/props stores.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate's internal modules.
pub type Result<T> = std::result::Result<T, EditorError>;
