//! Text-delta application: the window stream an editor feeds through
//! `apply_textdelta`, reconstructed against a file's current text-base.
//!
//! A real svndiff-style window carries a copy/insert instruction stream against a
//! source view plus a literal new-data buffer; decoding that format is out of scope
//! here. This module keeps the seam — a [`WindowHandler`] consumed window
//! by window, finalized once at end-of-stream — but simplifies each [`Window`] to
//! carry the literal reconstructed bytes for its span rather than an instruction
//! stream, which is enough to drive the rest of the install pipeline (checksum,
//! conflict handling, text-base replacement) faithfully.

use md5::{Digest, Md5};

use crate::collab::PristineStore;
use crate::error::Result;

/// One window of reconstructed text-delta output.
#[derive(Debug, Clone, Default)]
pub struct Window {
    /// The literal bytes this window contributes to the reconstructed file.
    pub data: Vec<u8>,
}

impl Window {
    /// Build a window carrying `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

/// Consumes a stream of [`Window`]s for one file, writing each to the tmp text-base
/// and accumulating an MD5 digest, the way `apply_textdelta`/`close_file` do.
pub struct WindowHandler<'a> {
    sink: Box<dyn std::io::Write + 'a>,
    hasher: Md5,
    bytes_written: u64,
}

impl<'a> WindowHandler<'a> {
    /// Open a handler that writes windows to `file`'s tmp text-base via `pristine`.
    pub fn open(pristine: &'a dyn PristineStore, file: &camino::Utf8Path) -> std::io::Result<Self> {
        let sink = pristine.open_write_tmp(file)?;
        Ok(Self {
            sink,
            hasher: Md5::new(),
            bytes_written: 0,
        })
    }

    /// Apply one window: append its bytes to the tmp text-base and fold them into
    /// the running digest.
    pub fn apply_window(&mut self, window: &Window) -> Result<()> {
        self.sink.write_all(&window.data)?;
        self.hasher.update(&window.data);
        self.bytes_written += window.data.len() as u64;
        Ok(())
    }

    /// Finalize the stream: flush the sink and return the hex MD5 digest of every
    /// window applied, plus the total byte count.
    pub fn close(mut self) -> Result<(String, u64)> {
        self.sink.flush()?;
        let digest = self.hasher.finalize();
        Ok((hex::encode(digest), self.bytes_written))
    }
}

/// Apply a full in-memory window stream in one call, for callers (tests, the
/// fixture-driven demo) that already have the whole reconstructed text rather than a
/// true streaming source.
pub fn apply_full_text(pristine: &dyn PristineStore, file: &camino::Utf8Path, text: &[u8]) -> Result<(String, u64)> {
    let mut handler = WindowHandler::open(pristine, file)?;
    handler.apply_window(&Window::new(text.to_vec()))?;
    handler.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_collab::{AdmAccess, FsPristineStore};
    use cap_std::fs::Dir;
    use camino::Utf8Path;

    fn fresh_pristine() -> (tempfile::TempDir, FsPristineStore) {
        let td = tempfile::tempdir().unwrap();
        let dir = Dir::open_ambient_dir(td.path(), cap_std::ambient_authority()).unwrap();
        let adm = AdmAccess::new(dir);
        (td, FsPristineStore::new(adm))
    }

    #[test]
    fn single_window_round_trips_and_hashes() {
        let (_td, pristine) = fresh_pristine();
        let (digest, len) = apply_full_text(&pristine, Utf8Path::new("a.txt"), b"hello world").unwrap();
        assert_eq!(len, 11);
        let expected = hex::encode(Md5::digest(b"hello world"));
        assert_eq!(digest, expected);
    }

    #[test]
    fn multiple_windows_accumulate_into_one_digest() {
        let (_td, pristine) = fresh_pristine();
        let mut handler = WindowHandler::open(&pristine, Utf8Path::new("b.txt")).unwrap();
        handler.apply_window(&Window::new(b"hello ".to_vec())).unwrap();
        handler.apply_window(&Window::new(b"world".to_vec())).unwrap();
        let (digest, len) = handler.close().unwrap();
        assert_eq!(len, 11);
        let expected = hex::encode(Md5::digest(b"hello world"));
        assert_eq!(digest, expected);
    }
}
