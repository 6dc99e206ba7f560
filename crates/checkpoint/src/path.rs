//! Checkpoint identifier to directory naming
//!
//! Trainers name checkpoints like files (`step10.ckpt`). A distributed
//! checkpoint is a directory, so the `.ckpt` marker is appended when missing
//! and then stripped: `step10.ckpt` and `step10` both name directory `step10`,
//! while `model.pt` names `model.pt`. The marker is never materialized on disk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use ckpt_core::{Error, Result};

/// Reserved marker extension
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

/// Map a checkpoint identifier to its on-disk directory
pub fn to_directory<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    let marked = if has_marker(path) {
        path.to_path_buf()
    } else {
        append_marker(path)?
    };

    // Directories are later removed recursively based on this result
    if !has_marker(&marked) {
        return Err(invalid(path, "does not end in the .ckpt marker"));
    }

    let stem = marked
        .file_stem()
        .ok_or_else(|| invalid(path, "has no file name"))?;
    Ok(marked.with_file_name(stem))
}

/// Map a checkpoint directory back to its marked identifier
pub fn to_identifier<P: AsRef<Path>>(dir: P) -> Result<PathBuf> {
    append_marker(dir.as_ref())
}

/// The UTF-8 key storage backends address a path by
pub fn storage_key(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| invalid(path, "is not valid UTF-8"))
}

fn has_marker(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext == CHECKPOINT_EXTENSION)
}

fn append_marker(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| invalid(path, "has no file name"))?;

    let mut marked: OsString = name.to_os_string();
    marked.push(".");
    marked.push(CHECKPOINT_EXTENSION);
    Ok(path.with_file_name(marked))
}

fn invalid(path: &Path, reason: &str) -> Error {
    Error::InvalidPathKind {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}
