//! Scratch source files handed to the compiler.
//!
//! Each cache miss writes the candidate contents to a fresh file; after the
//! run the file and everything the compiler produced next to it is removed.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{DiagnoseError, DiagnoseResult};

/// Extensions the compiler writes next to `<stem>.v`.
const BYPRODUCT_EXTENSIONS: &[&str] = &["vo", "vok", "vos", "glob", "aux", "v.d"];

/// Abstraction over the temporary-file collaborator.
///
/// `TempScratch` implements this on the local filesystem.
/// Tests can provide a recording implementation.
pub trait ScratchFiles: Send + Sync {
    /// Write `contents` to a path that did not exist before the call.
    fn create(&self, contents: &str, suffix: &str) -> DiagnoseResult<PathBuf>;

    /// Best-effort removal of the file and compiler byproducts sharing its stem.
    fn cleanup(&self, path: &Path);
}

/// Scratch files in a directory (the OS temp dir by default).
///
/// Names start with `tmp` followed by random alphanumerics, which is the
/// shape the pattern generalizer wildcards.
#[derive(Debug, Clone, Default)]
pub struct TempScratch {
    dir: Option<PathBuf>,
}

impl TempScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place scratch files in `dir` instead of the OS temp dir.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    fn directory(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl ScratchFiles for TempScratch {
    fn create(&self, contents: &str, suffix: &str) -> DiagnoseResult<PathBuf> {
        let dir = self.directory();
        let mut file = tempfile::Builder::new()
            .prefix("tmp")
            .suffix(suffix)
            .tempfile_in(&dir)
            .map_err(|e| {
                DiagnoseError::scratch(format!(
                    "Failed to create scratch file in {}: {e}",
                    dir.display()
                ))
            })?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        let (_, path) = file
            .keep()
            .map_err(|e| DiagnoseError::scratch(format!("Failed to keep scratch file: {e}")))?;
        debug!(path = %path.display(), bytes = contents.len(), "wrote scratch file");
        Ok(path)
    }

    fn cleanup(&self, path: &Path) {
        for candidate in byproduct_paths(path) {
            match std::fs::remove_file(&candidate) {
                Ok(()) => debug!(path = %candidate.display(), "removed scratch artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %candidate.display(), "Failed to remove scratch artifact: {e}"),
            }
        }
    }
}

/// The file itself plus every byproduct path derived from its stem.
pub fn byproduct_paths(path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![path.to_path_buf()];
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return paths;
    };
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    for ext in BYPRODUCT_EXTENSIONS {
        let candidate = dir.join(format!("{stem}.{ext}"));
        if candidate != path {
            paths.push(candidate);
        }
    }
    paths.push(dir.join(format!(".{stem}.aux")));
    paths
}

/// `path` without its final extension, as the interactive toplevel expects.
pub fn path_without_extension(path: &Path) -> PathBuf {
    path.with_extension("")
}
