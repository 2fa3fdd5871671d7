//! Error types for the manifest engine.
//!
//! Mirrors the error kinds of the reconciliation design: each kind maps to one
//! failure domain (manifest parsing, fetch, dirty tree, cache integrity,
//! patch application, merge, submodule add). Hand-rolled `Display` rather than
//! a derive so each variant can render a styled, user-facing message.

use std::path::PathBuf;

use crate::styling::{ERROR, ERROR_BOLD, ERROR_EMOJI, HINT, HINT_EMOJI};

#[derive(Debug)]
pub enum GimeraError {
    /// A manifest is malformed: duplicate path, trailing separator, unknown
    /// type, unresolved `${var}`, or the file is simply missing.
    Manifest { message: String },
    /// Fetching one or more entries failed. Aggregated across workers.
    Fetch { failures: Vec<(PathBuf, String)> },
    /// Local edits would be destroyed by a reconciliation step.
    DirtyWorkingTree { path: PathBuf },
    /// A cache entry is missing required git-dir paths after a (re)fetch.
    CacheIntegrity { url: String, message: String },
    /// `patch` returned nonzero applying a patch file.
    PatchApply { file: PathBuf, message: String },
    /// `git pull --no-edit --no-rebase` failed while folding in a merge.
    Merge {
        remote: String,
        reference: String,
        message: String,
    },
    /// `git submodule add` failed even after the one permitted retry.
    SubmoduleAdd { path: PathBuf, message: String },
    /// Generic external-command failure, used by [`crate::exec::Cmd`].
    CommandFailed(String),
}

impl GimeraError {
    pub fn message(msg: impl Into<String>) -> Self {
        GimeraError::CommandFailed(msg.into())
    }
}

impl std::fmt::Display for GimeraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GimeraError::Manifest { message } => {
                write!(f, "{ERROR_EMOJI} {ERROR}gimera.yml: {message}{ERROR:#}")
            }
            GimeraError::Fetch { failures } => {
                writeln!(f, "{ERROR_EMOJI} {ERROR}fetch failed for {} repo(s){ERROR:#}", failures.len())?;
                for (path, message) in failures {
                    writeln!(f, "  {ERROR_BOLD}{}{ERROR_BOLD:#}: {message}", path.display())?;
                }
                write!(
                    f,
                    "\n{HINT_EMOJI} {HINT}set GIMERA_IGNORE_FETCH_ERRORS=1 to continue past fetch failures{HINT:#}"
                )
            }
            GimeraError::DirtyWorkingTree { path } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}refusing to overwrite local edits under {ERROR_BOLD}{}{ERROR_BOLD:#}{ERROR:#}\n\n{HINT_EMOJI} {HINT}commit, stash, or rerun with --force{HINT:#}",
                    path.display()
                )
            }
            GimeraError::CacheIntegrity { url, message } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}cache for {ERROR_BOLD}{url}{ERROR_BOLD:#}{ERROR} is incomplete: {message}{ERROR:#}"
                )
            }
            GimeraError::PatchApply { file, message } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}failed applying patch {ERROR_BOLD}{}{ERROR_BOLD:#}{ERROR}: {message}{ERROR:#}",
                    file.display()
                )
            }
            GimeraError::Merge {
                remote,
                reference,
                message,
            } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}merge of {ERROR_BOLD}{remote} {reference}{ERROR_BOLD:#}{ERROR} failed: {message}{ERROR:#}"
                )
            }
            GimeraError::SubmoduleAdd { path, message } => {
                write!(
                    f,
                    "{ERROR_EMOJI} {ERROR}git submodule add failed for {ERROR_BOLD}{}{ERROR_BOLD:#}{ERROR}: {message}{ERROR:#}",
                    path.display()
                )
            }
            GimeraError::CommandFailed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for GimeraError {}

impl From<std::io::Error> for GimeraError {
    fn from(e: std::io::Error) -> Self {
        GimeraError::CommandFailed(e.to_string())
    }
}
