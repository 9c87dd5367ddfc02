//! End-to-end scenarios driving the full [`UpdateEditor`]/`fs_collab` stack against a
//! real, temporary working copy.

use std::rc::Rc;

use camino::Utf8Path;
use cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;

use wc_update_editor::delta::Window;
use wc_update_editor::entry::{Entry, EntryMap, Kind, Schedule};
use wc_update_editor::error::EditorError;
use wc_update_editor::fs_collab::{AdmAccess, FsEntriesStore, FsLocalModsProbe, FsLogRunner, FsPristineStore, FsPropsStore};
use wc_update_editor::collab::EntriesStore as _;
use wc_update_editor::notify::{RecordingSink, State};
use wc_update_editor::{TreeDeltaEditor, UpdateEditor, UpdateParams};

fn fresh_wc() -> (tempfile::TempDir, Rc<AdmAccess>) {
    let td = tempfile::tempdir().unwrap();
    let dir = Dir::open_ambient_dir(td.path(), cap_std::ambient_authority()).unwrap();
    (td, AdmAccess::new(dir))
}

fn build_editor(adm: &Rc<AdmAccess>, anchor: &str, target: Option<&str>) -> UpdateEditor {
    let mut builder = UpdateParams::builder(anchor).notify(Box::new(RecordingSink::new()));
    if let Some(target) = target {
        builder = builder.target(target);
    }
    let ctx = builder.build();
    UpdateEditor::new(
        ctx,
        Box::new(FsEntriesStore::new(adm.clone())),
        Box::new(FsPropsStore::new(adm.clone())),
        Box::new(FsPristineStore::new(adm.clone())),
        Box::new(FsLogRunner::new(adm.clone())),
        Box::new(FsLocalModsProbe::new(adm.clone())),
    )
}

/// S1: fresh checkout of a single file.
#[test]
fn fresh_checkout_of_a_single_file() {
    let (_td, adm) = fresh_wc();
    let editor = build_editor(&adm, "", None);

    editor.set_target_revision(7).unwrap();
    let root = editor.open_root(0).unwrap();
    let hello = editor.add_file("hello.txt", root, None).unwrap();
    let mut handle = editor.apply_textdelta(hello, None).unwrap();
    handle.apply_window(&Window::new(*b"hi\n")).unwrap();
    handle.close().unwrap();
    editor
        .close_file(hello, Some("764efa883dda1e11db47671c4a3bbd9e"))
        .unwrap();
    editor.close_directory(root).unwrap();
    editor.close_edit().unwrap();

    let content = adm.root.read_to_string("hello.txt").unwrap();
    assert_eq!(content, "hi\n");

    let entries = FsEntriesStore::new(adm.clone());
    let map: EntryMap = entries.read(Utf8Path::new("")).unwrap();
    let entry = map.get("hello.txt").unwrap();
    assert_eq!(entry.revision, 7);
    assert_eq!(entry.checksum.as_deref(), Some("764efa883dda1e11db47671c4a3bbd9e"));

    let root_entry = map.get("").unwrap();
    assert!(!root_entry.incomplete);
}

/// Seeds an existing working copy with one versioned file `a.txt` at `old_revision`,
/// whose text-base is `old_text` and whose working content is `working_text` (so a
/// diff between the two simulates a local edit).
fn seed_existing_file(adm: &Rc<AdmAccess>, old_revision: u64, old_text: &[u8], working_text: &[u8]) {
    let pristine = FsPristineStore::new(adm.clone());
    {
        use std::io::Write;
        let mut w = pristine.open_write_tmp(Utf8Path::new("a.txt")).unwrap();
        w.write_all(old_text).unwrap();
    }
    let tmp = pristine.text_base_path(Utf8Path::new("a.txt"), true);
    let real = pristine.text_base_path(Utf8Path::new("a.txt"), false);
    adm.root.rename(tmp.as_std_path(), &adm.root, real.as_std_path()).unwrap();
    adm.root.write("a.txt", working_text).unwrap();

    let entries = FsEntriesStore::new(adm.clone());
    let mut map = EntryMap::new();
    map.insert(String::new(), {
        let mut e = Entry::new_add(Kind::Dir, "https://example/repo");
        e.schedule = Schedule::Normal;
        e.incomplete = false;
        e
    });
    map.insert("a.txt".to_string(), {
        let mut e = Entry::new_add(Kind::File, "https://example/repo/a.txt");
        e.schedule = Schedule::Normal;
        e.revision = old_revision;
        e
    });
    entries.write(Utf8Path::new(""), &map).unwrap();
}

/// S2: update over a local edit that doesn't overlap the incoming change — clean merge.
#[test]
fn update_over_local_edit_clean_merge() {
    let (_td, adm) = fresh_wc();
    seed_existing_file(&adm, 3, b"line1\nline2\nline3\n", b"line1\nLOCAL\nline3\n");
    let editor = build_editor(&adm, "", None);

    editor.set_target_revision(4).unwrap();
    let root = editor.open_root(0).unwrap();
    let file = editor.open_file("a.txt", root, 3).unwrap();
    let mut handle = editor.apply_textdelta(file, None).unwrap();
    handle.apply_window(&Window::new(*b"line1\nline2\nline3modified\n")).unwrap();
    handle.close().unwrap();
    editor.close_file(file, None).unwrap();
    editor.close_directory(root).unwrap();
    editor.close_edit().unwrap();

    let content = adm.root.read_to_string("a.txt").unwrap();
    assert_eq!(content, "line1\nLOCAL\nline3modified\n");

    let entries = FsEntriesStore::new(adm.clone());
    let map: EntryMap = entries.read(Utf8Path::new("")).unwrap();
    assert_eq!(map.get("a.txt").unwrap().revision, 4);
}

/// S3: same setup as S2, but the incoming change overlaps the local edit — conflict.
#[test]
fn update_over_local_edit_textual_conflict() {
    let (_td, adm) = fresh_wc();
    seed_existing_file(&adm, 3, b"line1\nline2\nline3\n", b"line1\nLOCAL\nline3\n");
    let editor = build_editor(&adm, "", None);

    editor.set_target_revision(4).unwrap();
    let root = editor.open_root(0).unwrap();
    let file = editor.open_file("a.txt", root, 3).unwrap();
    let mut handle = editor.apply_textdelta(file, None).unwrap();
    handle.apply_window(&Window::new(*b"line1\nSERVER\nline3\n")).unwrap();
    handle.close().unwrap();
    editor.close_file(file, None).unwrap();
    editor.close_directory(root).unwrap();
    editor.close_edit().unwrap();

    let content = adm.root.read_to_string("a.txt").unwrap();
    assert!(content.contains("LOCAL"));
    assert!(content.contains("SERVER"));
    assert!(adm.root.try_exists("a.txt.mine").unwrap());
}

/// S4: an unversioned plain directory sits where the driver tries to add one.
#[test]
fn obstruction_on_add_directory() {
    let (_td, adm) = fresh_wc();
    adm.root.create_dir_all("D").unwrap();
    let editor = build_editor(&adm, "", None);

    editor.set_target_revision(1).unwrap();
    let root = editor.open_root(0).unwrap();
    let err = editor.add_directory("D", root, None).unwrap_err();
    assert!(matches!(err, EditorError::ObstructedUpdate { .. }));

    let entries = FsEntriesStore::new(adm.clone());
    let map: EntryMap = entries.read(Utf8Path::new("")).unwrap();
    assert!(!map.contains_key("D"));
}

/// S5: the edit's sole target is deleted server-side.
#[test]
fn target_deletion_leaves_a_tombstone() {
    let (_td, adm) = fresh_wc();
    adm.root.create_dir_all("proj").unwrap();
    adm.root.write("proj/gone", b"bye").unwrap();

    let entries = FsEntriesStore::new(adm.clone());
    let mut map = EntryMap::new();
    map.insert(String::new(), {
        let mut e = Entry::new_add(Kind::Dir, "https://example/repo/proj");
        e.schedule = Schedule::Normal;
        e.incomplete = false;
        e.revision = 9;
        e
    });
    map.insert("gone".to_string(), {
        let mut e = Entry::new_add(Kind::File, "https://example/repo/proj/gone");
        e.schedule = Schedule::Normal;
        e.revision = 9;
        e
    });
    entries.write(Utf8Path::new("proj"), &map).unwrap();

    let editor = build_editor(&adm, "proj", Some("gone"));
    editor.set_target_revision(10).unwrap();
    let root = editor.open_root(0).unwrap();
    editor.delete_entry("gone", None, root).unwrap();
    editor.close_edit().unwrap();

    assert!(!adm.root.try_exists("proj/gone").unwrap());

    let map: EntryMap = entries.read(Utf8Path::new("proj")).unwrap();
    let tombstone = map.get("gone").unwrap();
    assert_eq!(tombstone.revision, 10);
    assert!(tombstone.deleted);

    let this_dir = map.get("").unwrap();
    assert!(!this_dir.incomplete);
}

/// S6: the anchor/target resolver.
mod anchor_resolution {
    use wc_update_editor::anchor::{resolve, WcLookup};
    use wc_update_editor::entry::Kind;

    struct FakeLookup {
        urls: std::collections::BTreeMap<&'static str, &'static str>,
    }

    impl WcLookup for FakeLookup {
        fn lookup(&self, path: &camino::Utf8Path) -> Option<(Kind, Option<String>)> {
            self.urls.get(path.as_str()).map(|url| (Kind::Dir, Some(url.to_string())))
        }
    }

    #[test]
    fn empty_path_resolves_to_the_root_with_no_target() {
        let lookup = FakeLookup { urls: Default::default() };
        let (anchor, target) = resolve(camino::Utf8Path::new(""), &lookup).unwrap();
        assert_eq!(anchor, "");
        assert_eq!(target, None);
    }

    #[test]
    fn a_consistent_child_url_makes_the_parent_the_anchor() {
        let mut urls = std::collections::BTreeMap::new();
        urls.insert("foo", "https://example/repo/foo");
        urls.insert("foo/bar", "https://example/repo/foo/bar");
        let lookup = FakeLookup { urls };
        let (anchor, target) = resolve(camino::Utf8Path::new("foo/bar"), &lookup).unwrap();
        assert_eq!(anchor, "foo");
        assert_eq!(target.as_deref(), Some("bar"));
    }

    #[test]
    fn a_diverging_child_url_makes_the_child_its_own_root() {
        let mut urls = std::collections::BTreeMap::new();
        urls.insert("foo", "https://example/repo/foo");
        urls.insert("foo/bar", "https://example/other-repo/bar");
        let lookup = FakeLookup { urls };
        let (anchor, target) = resolve(camino::Utf8Path::new("foo/bar"), &lookup).unwrap();
        assert_eq!(anchor, "foo/bar");
        assert_eq!(target, None);
    }
}

/// Notification precedence: conflicted beats merged beats changed beats unchanged,
/// the order `install_file`'s callers rely on when combining content/prop states.
#[test]
fn notification_state_precedence_is_worst_wins() {
    assert_eq!(State::precedence(State::Unchanged, State::Changed), State::Changed);
    assert_eq!(State::precedence(State::Changed, State::Merged), State::Merged);
    assert_eq!(State::precedence(State::Merged, State::Conflicted), State::Conflicted);
    assert_eq!(State::precedence(State::Conflicted, State::Unchanged), State::Conflicted);
}
