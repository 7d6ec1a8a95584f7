//! Host-side directories bound into containers.

use std::fs;
use std::path::Path;

use dockcheck_common::error::{HarnessError, Result};
use dockcheck_common::types::RunId;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Creates a fresh temporary directory for `run_id`, seeded with a copy of
/// `fixture` when given.
///
/// The directory is deleted when the returned handle is closed or dropped.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created or the fixture
/// cannot be copied.
pub fn stage_dir(run_id: &RunId, fixture: Option<&Path>) -> Result<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("dockcheck-{run_id}-"))
        .tempdir()
        .map_err(|e| HarnessError::Io {
            path: std::env::temp_dir(),
            source: e,
        })?;
    if let Some(fixture) = fixture {
        copy_tree(fixture, dir.path())?;
    }
    tracing::debug!(path = %dir.path().display(), "staged host directory");
    Ok(dir)
}

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> HarnessError {
    let path = path.to_path_buf();
    move |source| HarnessError::Io { path, source }
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            HarnessError::Io {
                path,
                source: e.into(),
            }
        })?;
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io(&target))?;
        } else {
            let _ = fs::copy(entry.path(), &target).map_err(io(&target))?;
        }
    }
    Ok(())
}

/// Names of the immediate subdirectories of `dir`, sorted.
///
/// # Errors
///
/// Returns an I/O error if `dir` cannot be read.
pub fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io(dir))? {
        let entry = entry.map_err(io(dir))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
