//! `install_file`: the integration core that turns an already-applied text-delta and
//! a batch of pending property changes into a committed log.
//!
//! Every mutation this function decides on is expressed as a [`LogCommand`] and
//! handed to the [`LogRunner`] as a single batch — nothing here touches the working
//! copy directly, which is what makes a crash mid-install recoverable by replay.

use camino::Utf8Path;
use chrono::Utc;

use crate::cancel::Cancellation;
use crate::collab::{EntriesStore, LocalModsProbe, LogRunner, PristineStore, PropsStore, ReplayOutcome};
use crate::error::{EditorError, Result};
use crate::log::LogCommand;
use crate::props::{any_magic_prop_changed, partition, PropertyChange};

/// Everything `install_file` needs to know about one file's pending change.
pub struct InstallRequest<'a> {
    /// The directory the file lives in.
    pub dir: &'a Utf8Path,
    /// The file's basename.
    pub name: &'a str,
    /// The revision this install settles the entry at.
    pub new_revision: u64,
    /// `true` if a text-delta was applied and a new tmp text-base is waiting.
    pub has_new_text_base: bool,
    /// The hex MD5 digest of the new text-base, if `has_new_text_base`.
    pub new_text_checksum: Option<String>,
    /// Pending property changes, in diff form unless `is_full_proplist`.
    pub prop_changes: &'a [PropertyChange],
    /// `true` if `prop_changes` is a full replacement list rather than a diff.
    pub is_full_proplist: bool,
    /// The file's URL after this edit, if it changed (or is being set for the
    /// first time).
    pub new_url: Option<String>,
    /// `true` if this file is newly scheduled-for-add.
    pub is_add: bool,
    /// Copy-from (url, revision), only valid alongside `is_add`.
    pub copyfrom: Option<(String, u64)>,
}

/// The collaborators `install_file` delegates every actual mutation to.
pub struct InstallDeps<'a> {
    /// Entries table access (read-only here; all writes go through the log).
    pub entries: &'a dyn EntriesStore,
    /// Regular-prop pristine storage.
    pub props: &'a dyn PropsStore,
    /// Flushes and replays the accumulated log.
    pub log_runner: &'a dyn LogRunner,
    /// Detects local modifications to the working file.
    pub local_mods: &'a dyn LocalModsProbe,
    /// Derives text-base paths.
    pub pristine: &'a dyn PristineStore,
    /// Checked before replay.
    pub cancel: &'a Cancellation,
}

/// Run the integration algorithm and replay the resulting log, returning the
/// post-replay conflict probe the caller uses to drive notification.
pub fn install_file(deps: &InstallDeps, req: &InstallRequest) -> Result<ReplayOutcome> {
    if req.is_add && req.new_revision != 0 {
        return Err(EditorError::InvalidArguments("new_revision must be 0 when is_add is set"));
    }
    if req.copyfrom.is_some() && !req.is_add {
        return Err(EditorError::InvalidArguments("copyfrom requires is_add"));
    }

    let working_path = req.dir.join(req.name);
    let old_entry = deps.entries.read(req.dir)?.get(req.name).cloned();
    let old_revision = old_entry.as_ref().map(|e| e.revision).unwrap_or(0);

    let mut log = Vec::new();

    // 1. Schedule-for-add.
    if req.is_add {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("schedule".to_string(), "add".to_string());
        if let Some((url, rev)) = &req.copyfrom {
            fields.insert("copyfrom-url".to_string(), url.clone());
            fields.insert("copyfrom-rev".to_string(), rev.to_string());
        }
        log.push(LogCommand::ModifyEntry {
            name: req.name.to_string(),
            fields,
        });
    }

    // 2. Place new text-base (tmp text-base is assumed already at the expected
    // staging path, since `delta::WindowHandler` writes there directly via
    // `PristineStore::open_write_tmp`; this step is a no-op placement check in this
    // implementation rather than a real relocation).
    let tmp_text_base = deps.pristine.text_base_path(&working_path, true);
    let real_text_base = deps.pristine.text_base_path(&working_path, false);

    // 3. Property merge.
    let (regular, entry_props, wc_props) = partition(req.prop_changes);
    let regular_diff = if req.is_full_proplist {
        let pristine_props = deps.props.load(req.dir, req.name)?;
        let mut new_map = pristine_props.clone();
        for change in &regular {
            match &change.value {
                Some(v) => {
                    new_map.insert(change.name.clone(), v.clone());
                }
                None => {
                    new_map.remove(&change.name);
                }
            }
        }
        let mut diff = Vec::new();
        for (k, v) in &new_map {
            if pristine_props.get(k) != Some(v) {
                diff.push(PropertyChange::set(k.clone(), v.clone()));
            }
        }
        for k in pristine_props.keys() {
            if !new_map.contains_key(k) {
                diff.push(PropertyChange::delete(k.clone()));
            }
        }
        diff
    } else {
        regular.clone()
    };
    let magic_prop_changed = any_magic_prop_changed(&regular_diff);
    if !regular_diff.is_empty() {
        let mut merged = deps.props.load(req.dir, req.name)?;
        for change in &regular_diff {
            match &change.value {
                Some(v) => {
                    merged.insert(change.name.clone(), v.clone());
                }
                None => {
                    merged.remove(&change.name);
                }
            }
        }
        // Regular props are not named in the log-verb vocabulary; this is the
        // one other non-journaled step, alongside text-base placement above.
        deps.props.store(req.dir, req.name, &merged)?;
    }

    // 4. Entry-prop commands, before textual merging.
    for change in &entry_props {
        if change.is_tombstone() {
            continue;
        }
        if let Some(field) = crate::props::entry_prop_field(&change.name) {
            let mut fields = std::collections::BTreeMap::new();
            fields.insert(field.to_string(), change.value.clone().unwrap_or_default());
            log.push(LogCommand::ModifyEntry {
                name: req.name.to_string(),
                fields,
            });
        }
    }

    // 5. Locally-modified check.
    let locally_modified = deps.local_mods.has_local_mods(&working_path)?;
    let working_exists = deps.local_mods.working_exists(&working_path)?;

    // 6. Text integration matrix.
    let mut text_installed = false;
    if req.has_new_text_base {
        text_installed = true;
        if !locally_modified || !working_exists {
            log.push(LogCommand::CpAndTranslate {
                src: tmp_text_base.to_string(),
                dst: working_path.to_string(),
            });
        } else {
            log.push(LogCommand::Merge {
                name: req.name.to_string(),
                left: real_text_base.to_string(),
                right: tmp_text_base.to_string(),
                left_label: format!("r{old_revision}"),
                right_label: format!("r{}", req.new_revision),
            });
        }
    } else if magic_prop_changed {
        text_installed = true;
        let scratch = deps.pristine.text_base_path(&working_path, true);
        log.push(LogCommand::CpAndDetranslate {
            src: working_path.to_string(),
            dst: scratch.to_string(),
        });
        log.push(LogCommand::CpAndTranslate {
            src: scratch.to_string(),
            dst: working_path.to_string(),
        });
    }

    // 7. Revision bump.
    let mut bump_fields = std::collections::BTreeMap::new();
    bump_fields.insert("kind".to_string(), "file".to_string());
    bump_fields.insert("revision".to_string(), req.new_revision.to_string());
    bump_fields.insert("deleted".to_string(), "false".to_string());
    bump_fields.insert("schedule".to_string(), "normal".to_string());
    log.push(LogCommand::ModifyEntry {
        name: req.name.to_string(),
        fields: bump_fields,
    });

    // 8. URL.
    if let Some(url) = &req.new_url {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("url".to_string(), url.clone());
        log.push(LogCommand::ModifyEntry {
            name: req.name.to_string(),
            fields,
        });
    }

    // 9. Timestamps.
    let now = Utc::now().to_rfc3339();
    if !locally_modified && text_installed {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("text-time".to_string(), now.clone());
        log.push(LogCommand::ModifyEntry {
            name: req.name.to_string(),
            fields,
        });
    }
    if !regular_diff.is_empty() && !locally_modified {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("prop-time".to_string(), now.clone());
        log.push(LogCommand::ModifyEntry {
            name: req.name.to_string(),
            fields,
        });
    }

    // 10. Text-base rotation.
    if req.has_new_text_base {
        log.push(LogCommand::Mv {
            src: tmp_text_base.to_string(),
            dst: real_text_base.to_string(),
        });
        log.push(LogCommand::Readonly {
            path: real_text_base.to_string(),
        });
        if let Some(checksum) = &req.new_text_checksum {
            let mut fields = std::collections::BTreeMap::new();
            fields.insert("checksum".to_string(), checksum.clone());
            log.push(LogCommand::ModifyEntry {
                name: req.name.to_string(),
                fields,
            });
        }
    }

    // 11. Wc-props.
    for change in &wc_props {
        log.push(LogCommand::ModifyWcProp {
            name: req.name.to_string(),
            propname: change.name.clone(),
            value: change.value.clone(),
        });
    }

    // 12. Final mtime command, last in the log.
    log.push(LogCommand::SetTimestamp {
        path: working_path.to_string(),
        timestamp: Some(now),
    });

    let mut outcome = deps.log_runner.run_log(req.dir, &log, deps.cancel)?;
    if !regular_diff.is_empty() {
        outcome
            .prop_state
            .entry(req.name.to_string())
            .and_modify(|s| *s = crate::notify::State::precedence(*s, crate::notify::State::Changed))
            .or_insert(crate::notify::State::Changed);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, EntryMap, Kind};
    use crate::fs_collab::{AdmAccess, FsEntriesStore, FsLocalModsProbe, FsLogRunner, FsPristineStore, FsPropsStore};
    use cap_std::fs::Dir;
    use cap_std_ext::dirext::CapStdExtDirExt;

    fn fresh() -> (tempfile::TempDir, std::rc::Rc<AdmAccess>) {
        let td = tempfile::tempdir().unwrap();
        let dir = Dir::open_ambient_dir(td.path(), cap_std::ambient_authority()).unwrap();
        (td, AdmAccess::new(dir))
    }

    #[test]
    fn adds_a_brand_new_file_cleanly() {
        let (_td, adm) = fresh();
        let entries = FsEntriesStore::new(adm.clone());
        let props = FsPropsStore::new(adm.clone());
        let log_runner = FsLogRunner::new(adm.clone());
        let local_mods = FsLocalModsProbe::new(adm.clone());
        let pristine = FsPristineStore::new(adm.clone());
        let cancel = Cancellation::never();

        {
            let mut w = pristine.open_write_tmp(Utf8Path::new("hello.txt")).unwrap();
            use std::io::Write;
            w.write_all(b"hello world").unwrap();
        }

        let deps = InstallDeps {
            entries: &entries,
            props: &props,
            log_runner: &log_runner,
            local_mods: &local_mods,
            pristine: &pristine,
            cancel: &cancel,
        };
        let req = InstallRequest {
            dir: Utf8Path::new(""),
            name: "hello.txt",
            new_revision: 0,
            has_new_text_base: true,
            new_text_checksum: Some("d41d8cd98f00b204e9800998ecf8427e".to_string()),
            prop_changes: &[],
            is_full_proplist: false,
            new_url: Some("https://example/repo/hello.txt".to_string()),
            is_add: true,
            copyfrom: None,
        };

        let outcome = install_file(&deps, &req).unwrap();
        assert!(outcome.content_state.is_empty());
        assert!(adm.root.try_exists("hello.txt").unwrap());
        let content = adm.root.read_to_string("hello.txt").unwrap();
        assert_eq!(content, "hello world");

        let map: EntryMap = entries.read(Utf8Path::new("")).unwrap();
        let entry = map.get("hello.txt").unwrap();
        assert_eq!(entry.kind, Kind::File);
        assert_eq!(entry.url, "https://example/repo/hello.txt");
        assert_eq!(entry.schedule, crate::entry::Schedule::Normal);
    }

    #[test]
    fn conflicting_update_marks_entry_conflicted() {
        let (_td, adm) = fresh();
        let entries = FsEntriesStore::new(adm.clone());
        let props = FsPropsStore::new(adm.clone());
        let log_runner = FsLogRunner::new(adm.clone());
        let local_mods = FsLocalModsProbe::new(adm.clone());
        let pristine = FsPristineStore::new(adm.clone());
        let cancel = Cancellation::never();

        // Seed an existing text-base and a locally-modified working file.
        {
            let mut w = pristine.open_write_tmp(Utf8Path::new("a.txt")).unwrap();
            use std::io::Write;
            w.write_all(b"line1\nline2\nline3\n").unwrap();
        }
        let tmp_path = pristine.text_base_path(Utf8Path::new("a.txt"), true);
        let real_path = pristine.text_base_path(Utf8Path::new("a.txt"), false);
        adm.root
            .rename(tmp_path.as_std_path(), &adm.root, real_path.as_std_path())
            .unwrap();
        adm.root.write("a.txt", b"line1\nLOCAL\nline3\n").unwrap();

        let mut map = EntryMap::new();
        map.insert("a.txt".to_string(), {
            let mut e = Entry::new_add(Kind::File, "https://example/repo/a.txt");
            e.schedule = crate::entry::Schedule::Normal;
            e.revision = 3;
            e
        });
        entries.write(Utf8Path::new(""), &map).unwrap();

        {
            let mut w = pristine.open_write_tmp(Utf8Path::new("a.txt")).unwrap();
            use std::io::Write;
            w.write_all(b"line1\nSERVER\nline3\n").unwrap();
        }

        let deps = InstallDeps {
            entries: &entries,
            props: &props,
            log_runner: &log_runner,
            local_mods: &local_mods,
            pristine: &pristine,
            cancel: &cancel,
        };
        let req = InstallRequest {
            dir: Utf8Path::new(""),
            name: "a.txt",
            new_revision: 4,
            has_new_text_base: true,
            new_text_checksum: Some("ignored".to_string()),
            prop_changes: &[],
            is_full_proplist: false,
            new_url: None,
            is_add: false,
            copyfrom: None,
        };

        let outcome = install_file(&deps, &req).unwrap();
        assert_eq!(outcome.content_state_of("a.txt"), crate::notify::State::Conflicted);
        assert!(adm.root.try_exists("a.txt.mine").unwrap());
    }
}
