//! `apply-delta`: feeds a JSON-described tree-delta script through [`wc_update_editor`]
//! against a real, `cap_std`-sandboxed directory. Not part of the crate's public
//! contract — a manual smoke-testing aid, the way a library ships a small driver
//! binary to exercise its own callback surface end to end.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use cap_std::fs::Dir;
use clap::Parser;
use serde::Deserialize;

use wc_update_editor::fs_collab::{AdmAccess, FsEntriesStore, FsLocalModsProbe, FsLogRunner, FsPristineStore, FsPropsStore};
use wc_update_editor::{DirToken, FileToken, TreeDeltaEditor, UpdateEditor, UpdateParams, UpdateParamsBuilder};

/// Replay a scripted tree delta against a working copy.
#[derive(Parser, Debug)]
#[command(name = "apply-delta")]
#[command(about = "Apply a scripted tree delta to a working copy, svn-update style")]
struct Args {
    /// The working copy directory the script will be applied to.
    working_copy: PathBuf,
    /// JSON file describing the sequence of tree-delta operations to apply.
    script: PathBuf,
    /// Prefer an external `diff3`-compatible binary over the in-process merge.
    #[arg(long, value_name = "PATH")]
    diff3: Option<PathBuf>,
    /// Restrict the edit to a single basename within the working copy.
    #[arg(long)]
    target: Option<String>,
}

/// One step of a scripted tree delta. Paths are anchor-relative and slash-separated;
/// the empty string names the root.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DeltaOp {
    SetTargetRevision { revision: u64 },
    OpenRoot,
    AddDirectory { path: String, parent: String, name: String },
    OpenDirectory { path: String, parent: String, name: String, base_revision: u64 },
    CloseDirectory { path: String },
    DeleteEntry { parent: String, name: String, revision: Option<u64> },
    AddFile { path: String, parent: String, name: String, text: Option<String> },
    OpenFile { path: String, parent: String, name: String, base_revision: u64, text: Option<String> },
    ChangeDirProp { path: String, name: String, value: Option<String> },
    ChangeFileProp { path: String, name: String, value: Option<String> },
    CloseFile { path: String, text_checksum: Option<String> },
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing();

    let script_text = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading delta script {}", args.script.display()))?;
    let ops: Vec<DeltaOp> = serde_json::from_str(&script_text).context("parsing delta script as JSON")?;

    std::fs::create_dir_all(&args.working_copy)
        .with_context(|| format!("creating working copy directory {}", args.working_copy.display()))?;
    let root = Dir::open_ambient_dir(&args.working_copy, cap_std::ambient_authority())
        .with_context(|| format!("opening working copy directory {}", args.working_copy.display()))?;
    let adm = AdmAccess::new(root);

    let anchor = Utf8PathBuf::from("");
    let mut builder: UpdateParamsBuilder = UpdateParams::builder(anchor);
    if let Some(target) = &args.target {
        builder = builder.target(target.clone());
    }
    if let Some(diff3) = &args.diff3 {
        let diff3 = Utf8PathBuf::from_path_buf(diff3.clone()).map_err(|p| anyhow::anyhow!("non-UTF-8 path: {}", p.display()))?;
        builder = builder.diff3_cmd(diff3);
    }
    let ctx = builder.build();

    let editor = UpdateEditor::new(
        ctx,
        Box::new(FsEntriesStore::new(adm.clone())),
        Box::new(FsPropsStore::new(adm.clone())),
        Box::new(FsPristineStore::new(adm.clone())),
        Box::new(FsLogRunner::new(adm.clone())),
        Box::new(FsLocalModsProbe::new(adm.clone())),
    );

    let mut dirs: BTreeMap<String, DirToken> = BTreeMap::new();
    let mut files: BTreeMap<String, FileToken> = BTreeMap::new();

    for op in ops {
        apply_op(&editor, op, &mut dirs, &mut files)?;
    }

    let info = editor.close_edit().context("closing edit")?;
    let externals_new = info.externals_new.borrow();
    if !externals_new.is_empty() {
        for (path, value) in externals_new.iter() {
            tracing::info!(%path, %value, "externals property set");
        }
    }

    Ok(())
}

fn apply_op(
    editor: &UpdateEditor,
    op: DeltaOp,
    dirs: &mut BTreeMap<String, DirToken>,
    files: &mut BTreeMap<String, FileToken>,
) -> Result<()> {
    match op {
        DeltaOp::SetTargetRevision { revision } => {
            editor.set_target_revision(revision).context("set_target_revision")?;
        }
        DeltaOp::OpenRoot => {
            let tok = editor.open_root(0).context("open_root")?;
            dirs.insert(String::new(), tok);
        }
        DeltaOp::AddDirectory { path, parent, name } => {
            let parent_tok = *dirs.get(&parent).with_context(|| format!("unknown parent directory {parent:?}"))?;
            let tok = editor
                .add_directory(&name, parent_tok, None)
                .with_context(|| format!("add_directory {path:?}"))?;
            dirs.insert(path, tok);
        }
        DeltaOp::OpenDirectory {
            path,
            parent,
            name,
            base_revision,
        } => {
            let parent_tok = *dirs.get(&parent).with_context(|| format!("unknown parent directory {parent:?}"))?;
            let tok = editor
                .open_directory(&name, parent_tok, base_revision)
                .with_context(|| format!("open_directory {path:?}"))?;
            dirs.insert(path, tok);
        }
        DeltaOp::CloseDirectory { path } => {
            let tok = dirs
                .remove(&path)
                .with_context(|| format!("unknown directory {path:?}"))?;
            editor.close_directory(tok).with_context(|| format!("close_directory {path:?}"))?;
        }
        DeltaOp::DeleteEntry { parent, name, revision } => {
            let parent_tok = *dirs.get(&parent).with_context(|| format!("unknown parent directory {parent:?}"))?;
            editor
                .delete_entry(&name, revision, parent_tok)
                .with_context(|| format!("delete_entry {name:?} under {parent:?}"))?;
        }
        DeltaOp::AddFile { path, parent, name, text } => {
            let parent_tok = *dirs.get(&parent).with_context(|| format!("unknown parent directory {parent:?}"))?;
            let tok = editor.add_file(&name, parent_tok, None).with_context(|| format!("add_file {path:?}"))?;
            if let Some(text) = text {
                write_full_text(editor, tok, &text)?;
            }
            files.insert(path, tok);
        }
        DeltaOp::OpenFile {
            path,
            parent,
            name,
            base_revision,
            text,
        } => {
            let parent_tok = *dirs.get(&parent).with_context(|| format!("unknown parent directory {parent:?}"))?;
            let tok = editor
                .open_file(&name, parent_tok, base_revision)
                .with_context(|| format!("open_file {path:?}"))?;
            if let Some(text) = text {
                write_full_text(editor, tok, &text)?;
            }
            files.insert(path, tok);
        }
        DeltaOp::ChangeDirProp { path, name, value } => {
            let tok = *dirs.get(&path).with_context(|| format!("unknown directory {path:?}"))?;
            editor
                .change_dir_prop(tok, &name, value.as_deref())
                .with_context(|| format!("change_dir_prop {name:?} on {path:?}"))?;
        }
        DeltaOp::ChangeFileProp { path, name, value } => {
            let tok = *files.get(&path).with_context(|| format!("unknown file {path:?}"))?;
            editor
                .change_file_prop(tok, &name, value.as_deref())
                .with_context(|| format!("change_file_prop {name:?} on {path:?}"))?;
        }
        DeltaOp::CloseFile { path, text_checksum } => {
            let tok = files.remove(&path).with_context(|| format!("unknown file {path:?}"))?;
            editor
                .close_file(tok, text_checksum.as_deref())
                .with_context(|| format!("close_file {path:?}"))?;
        }
    }
    Ok(())
}

fn write_full_text(editor: &UpdateEditor, file: FileToken, text: &str) -> Result<()> {
    let mut handle = editor.apply_textdelta(file, None).context("apply_textdelta")?;
    handle
        .apply_window(&wc_update_editor::delta::Window::new(text.as_bytes().to_vec()))
        .context("apply_window")?;
    handle.close().context("closing text-delta stream")?;
    Ok(())
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}
