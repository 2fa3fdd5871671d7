//! Submodule enumeration and add/remove.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::Repo;
use crate::exec::Cmd;

#[derive(Debug, Clone)]
pub struct SubmoduleEntry {
    pub relpath: PathBuf,
    pub sha: String,
}

/// Parse `git submodule status`, skipping uninitialized (`-`) and stray `./` entries.
pub fn list(repo: &Repo) -> Result<Vec<SubmoduleEntry>> {
    let output = repo.run(&["submodule", "status"]).unwrap_or_default();
    let mut out = Vec::new();
    for line in output.lines() {
        let line = line.trim_start_matches(['-', '+', 'U', ' ']);
        let mut parts = line.split_whitespace();
        let Some(sha) = parts.next() else { continue };
        let Some(path) = parts.next() else { continue };
        if path == "./" {
            continue;
        }
        out.push(SubmoduleEntry { relpath: PathBuf::from(path), sha: sha.to_string() });
    }
    Ok(out)
}

/// Remove a submodule entirely: deregister from `.gitmodules`/config, delete
/// the working tree path, commit the removal, and purge `.git/modules/<path>`.
pub fn force_remove(repo: &Repo, relpath: &Path) -> Result<()> {
    let rel = relpath.to_string_lossy().into_owned();

    repo.run(&["submodule", "deinit", "-f", "--", &rel]).ok();

    let section = format!("submodule.{rel}");
    Cmd::new("git")
        .args(["config", "-f", ".gitmodules", "--remove-section", &section])
        .current_dir(repo.path())
        .run()
        .ok();
    Cmd::new("git")
        .args(["config", "--remove-section", &section])
        .current_dir(repo.path())
        .run()
        .ok();

    let full_path = repo.path().join(relpath);
    if full_path.exists() {
        std::fs::remove_dir_all(&full_path).ok();
    }

    repo.run(&["add", "-A", "--", ".gitmodules", &rel]).ok();
    let staged = repo.run(&["diff", "--cached", "--name-only"]).unwrap_or_default();
    if !staged.trim().is_empty() {
        repo.run(&["commit", "--no-verify", "-m", &format!("remove submodule {rel}")])?;
    }

    let modules_path = repo.git_dir().join("modules").join(relpath);
    if modules_path.exists() {
        std::fs::remove_dir_all(&modules_path).ok();
    }

    Ok(())
}

/// Install a submodule, retrying once after cleaning up stale `.git/modules` state.
pub fn add(repo: &Repo, branch: &str, url: &str, relpath: &Path) -> Result<()> {
    let rel = relpath.to_string_lossy().into_owned();
    let attempt = || -> Result<()> {
        Cmd::new("git")
            .args(["-c", "protocol.file.allow=always", "submodule", "add", "--force", "-b", branch, url, &rel])
            .current_dir(repo.path())
            .context(repo.path().display().to_string())
            .run_checked()
            .map(|_| ())
    };

    if attempt().is_ok() {
        return Ok(());
    }

    let modules_path = repo.git_dir().join("modules").join(relpath);
    if modules_path.exists() {
        std::fs::remove_dir_all(&modules_path).ok();
    }
    let full_path = repo.path().join(relpath);
    if full_path.exists() {
        std::fs::remove_dir_all(&full_path).ok();
    }

    attempt().with_context(|| format!("submodule add failed for {}", relpath.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_skipping_uninitialized() {
        let output = "-0000000000000000000000000000000000000000 sub1\n\
             1111111111111111111111111111111111111111 sub2 (heads/main)\n\
             2222222222222222222222222222222222222222 ./\n";
        let entries = list_from_str(output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relpath, PathBuf::from("sub2"));
    }

    fn list_from_str(output: &str) -> Vec<SubmoduleEntry> {
        let mut out = Vec::new();
        for line in output.lines() {
            let line = line.trim_start_matches(['-', '+', 'U', ' ']);
            let mut parts = line.split_whitespace();
            let Some(sha) = parts.next() else { continue };
            let Some(path) = parts.next() else { continue };
            if path == "./" {
                continue;
            }
            out.push(SubmoduleEntry { relpath: PathBuf::from(path), sha: sha.to_string() });
        }
        out
    }
}
