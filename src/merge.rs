//! Three-way textual merge, and the EOL/keyword translation seam.
//!
//! Grounded on [`diffy`], the merge crate `jj` (a working-copy-oriented version
//! control tool) uses for the same job. An optional external `diff3` binary can be
//! substituted by shelling out via `std::process::Command`.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::Context;

/// The outcome of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Incoming and local changes didn't overlap (or were textually identical); the
    /// merge succeeded cleanly.
    Merged(String),
    /// Incoming and local changes conflicted; the text carries conflict markers.
    Conflicted(String),
}

impl MergeOutcome {
    /// `true` for [`MergeOutcome::Conflicted`].
    pub fn is_conflicted(&self) -> bool {
        matches!(self, MergeOutcome::Conflicted(_))
    }

    /// The resulting text, either way.
    pub fn into_text(self) -> String {
        match self {
            MergeOutcome::Merged(t) | MergeOutcome::Conflicted(t) => t,
        }
    }
}

/// Performs the textual three-way merge of the incoming and local versions of a file.
pub struct TextMerger {
    /// When set, shell out to this `diff3`-compatible binary instead of the in-process
    /// `diffy` merge. Out-of-scope to make robust; the seam is real and
    /// falls back to `diffy` on I/O failure.
    pub diff3_cmd: Option<PathBuf>,
}

impl Default for TextMerger {
    fn default() -> Self {
        Self { diff3_cmd: None }
    }
}

impl TextMerger {
    /// Build a merger that always uses the in-process `diffy`-based merge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a merger that prefers shelling out to an external `diff3`-compatible
    /// binary, falling back to `diffy` if the process can't be spawned.
    pub fn with_diff3(cmd: PathBuf) -> Self {
        Self { diff3_cmd: Some(cmd) }
    }

    /// Three-way merge `mine` against `base` (common ancestor, i.e. the old
    /// text-base) and `theirs` (the new text-base), as used by the `MERGE` log
    /// command.
    pub fn merge(&self, base: &str, mine: &str, theirs: &str) -> anyhow::Result<MergeOutcome> {
        if let Some(cmd) = &self.diff3_cmd {
            match run_external_diff3(cmd, mine, base, theirs) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    tracing::warn!("external diff3 failed, falling back to diffy: {e:#}");
                }
            }
        }
        Ok(merge_with_diffy(base, mine, theirs))
    }
}

fn merge_with_diffy(base: &str, mine: &str, theirs: &str) -> MergeOutcome {
    match diffy::merge(base, mine, theirs) {
        Ok(merged) => MergeOutcome::Merged(merged),
        Err(conflicted) => MergeOutcome::Conflicted(conflicted),
    }
}

/// Shell out to a `diff3 -m`-compatible binary. Its conflict marker exit status is 1
/// (conflicts present) or 0 (clean merge); anything else is a real failure.
fn run_external_diff3(cmd: &PathBuf, mine: &str, base: &str, theirs: &str) -> anyhow::Result<MergeOutcome> {
    let mine_file = write_temp("mine", mine)?;
    let base_file = write_temp("base", base)?;
    let theirs_file = write_temp("theirs", theirs)?;

    let output = Command::new(cmd)
        .arg("-m")
        .arg(mine_file.path())
        .arg(base_file.path())
        .arg(theirs_file.path())
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("spawning {}", cmd.display()))?;

    let text = String::from_utf8(output.stdout).context("diff3 output was not valid UTF-8")?;
    match output.status.code() {
        Some(0) => Ok(MergeOutcome::Merged(text)),
        Some(1) => Ok(MergeOutcome::Conflicted(text)),
        _ => anyhow::bail!("diff3 exited with status {:?}", output.status),
    }
}

fn write_temp(label: &str, content: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut f = tempfile::Builder::new()
        .prefix(&format!("wc-update-{label}-"))
        .tempfile()
        .with_context(|| format!("creating temp file for {label}"))?;
    f.write_all(content.as_bytes())?;
    f.flush()?;
    Ok(f)
}

/// End-of-line and keyword translation, applied when copying between the text-base
/// and the working file. A real implementation is out of scope here; this trait is
/// the seam `install_file` calls through, with a no-op default sufficient for the
/// invariants the rest of this crate relies on.
pub trait Translator {
    /// Translate text-base content into its working-copy form (expand keywords,
    /// convert EOLs to the configured style).
    fn translate(&self, text_base_content: &[u8]) -> Vec<u8>;

    /// Reverse [`Translator::translate`]: collapse a working file back to its
    /// canonical (text-base) form.
    fn detranslate(&self, working_content: &[u8]) -> Vec<u8>;
}

/// A translator that passes content through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEolTranslator;

impl Translator for NativeEolTranslator {
    fn translate(&self, text_base_content: &[u8]) -> Vec<u8> {
        text_base_content.to_vec()
    }

    fn detranslate(&self, working_content: &[u8]) -> Vec<u8> {
        working_content.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_merge_on_non_overlapping_edits() {
        let base = "line1\nline2\nline3\n";
        let mine = "line1\nLOCAL\nline3\n";
        let theirs = "line1\nline2\nline3modified\n";
        let merger = TextMerger::new();
        let outcome = merger.merge(base, mine, theirs).unwrap();
        assert!(!outcome.is_conflicted());
        assert_eq!(outcome.into_text(), "line1\nLOCAL\nline3modified\n");
    }

    #[test]
    fn conflicting_edits_to_the_same_line() {
        let base = "line1\nline2\nline3\n";
        let mine = "line1\nLOCAL\nline3\n";
        let theirs = "line1\nSERVER\nline3\n";
        let merger = TextMerger::new();
        let outcome = merger.merge(base, mine, theirs).unwrap();
        assert!(outcome.is_conflicted());
        let text = outcome.into_text();
        assert!(text.contains("LOCAL"));
        assert!(text.contains("SERVER"));
    }

    #[test]
    fn native_translator_is_identity() {
        let t = NativeEolTranslator;
        let data = b"hello\r\nworld\n".to_vec();
        assert_eq!(t.translate(&data), data);
        assert_eq!(t.detranslate(&data), data);
    }
}
