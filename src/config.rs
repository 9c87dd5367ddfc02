//! Builder for the parameters that start one edit.
//!
//! Follows a `WriteTarOptions`-style options-struct shape, except an
//! anchor path is mandatory (there's no sensible default edit root), so this is a
//! builder rather than a `#[derive(Default)]` struct: [`UpdateParams::builder`]
//! returns a [`UpdateParamsBuilder`] seeded with the anchor and the default
//! flag values (`recurse: true`, `use_commit_times: false`), and `.build()` produces
//! the [`crate::state::EditContext`] an [`crate::editor::UpdateEditor`] is
//! constructed from.

use camino::Utf8PathBuf;

use crate::cancel::Cancellation;
use crate::notify::{NotificationSink, PrintingSink};
use crate::state::EditContext;

/// Entry point for assembling one edit's parameters: `UpdateParams::builder(anchor)`
/// reads better at a call site than `UpdateParamsBuilder::new(anchor)`, even though
/// the builder is the only type involved.
pub struct UpdateParams;

impl UpdateParams {
    /// Start building params for an edit rooted at `anchor`.
    pub fn builder(anchor: impl Into<Utf8PathBuf>) -> UpdateParamsBuilder {
        UpdateParamsBuilder::new(anchor)
    }
}

/// Builder for one edit's parameters — anchor, target, recursion, switch URL,
/// diff3 override, notification sink, cancellation signal — consumed by
/// [`UpdateParamsBuilder::build`] into an [`EditContext`].
pub struct UpdateParamsBuilder {
    anchor: Utf8PathBuf,
    target: Option<String>,
    recurse: bool,
    use_commit_times: bool,
    switch_url: Option<String>,
    diff3_cmd: Option<Utf8PathBuf>,
    notify: Option<Box<dyn NotificationSink>>,
    cancel: Option<Cancellation>,
}

impl UpdateParamsBuilder {
    /// A fresh builder rooted at `anchor`, recursive, with no target and no switch.
    pub fn new(anchor: impl Into<Utf8PathBuf>) -> Self {
        Self {
            anchor: anchor.into(),
            target: None,
            recurse: true,
            use_commit_times: false,
            switch_url: None,
            diff3_cmd: None,
            notify: None,
            cancel: None,
        }
    }

    /// Restrict the edit to a single basename within the anchor.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Disable recursion into subdirectories.
    pub fn non_recursive(mut self) -> Self {
        self.recurse = false;
        self
    }

    /// Stamp working-file mtimes from the `committed_date` entry-prop.
    pub fn use_commit_times(mut self, value: bool) -> Self {
        self.use_commit_times = value;
        self
    }

    /// Mark this edit as a switch to `url`.
    pub fn switch_url(mut self, url: impl Into<String>) -> Self {
        self.switch_url = Some(url.into());
        self
    }

    /// Prefer an external `diff3`-compatible binary over the in-process merge.
    pub fn diff3_cmd(mut self, cmd: impl Into<Utf8PathBuf>) -> Self {
        self.diff3_cmd = Some(cmd.into());
        self
    }

    /// Report progress through `sink` instead of the default [`PrintingSink`].
    pub fn notify(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.notify = Some(sink);
        self
    }

    /// Check `cancel` instead of the default (never-cancels) signal.
    pub fn cancel(mut self, cancel: Cancellation) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Consume the builder into a fresh [`EditContext`].
    pub fn build(self) -> EditContext {
        EditContext::new(
            self.anchor,
            self.target,
            self.recurse,
            self.use_commit_times,
            self.switch_url,
            self.diff3_cmd,
            self.notify.unwrap_or_else(|| Box::new(PrintingSink)),
            self.cancel.unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_recursive_with_no_target() {
        let ctx = UpdateParams::builder("proj").build();
        assert_eq!(ctx.anchor, "proj");
        assert_eq!(ctx.target, None);
        assert!(ctx.recurse);
        assert!(!ctx.use_commit_times);
        assert!(!ctx.is_switch());
    }

    #[test]
    fn switch_url_marks_the_edit_as_a_switch() {
        let ctx = UpdateParams::builder("proj").switch_url("https://example/repo/branch").build();
        assert!(ctx.is_switch());
    }

    #[test]
    fn target_and_non_recursive_are_threaded_through() {
        let ctx = UpdateParams::builder("proj").target("gone").non_recursive().build();
        assert_eq!(ctx.target.as_deref(), Some("gone"));
        assert!(!ctx.recurse);
    }
}
