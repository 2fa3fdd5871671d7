//! Snapshot/restore: capture and replay uncommitted edits across nested
//! repository boundaries, used by `migrate_changes`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use uuid::Uuid;

use crate::env;
use crate::git::Repo;

const SNAPSHOT_DIR: &str = ".gimera/snapshots";

pub fn new_token() -> String {
    if let Some(t) = env::token_override() {
        return t;
    }
    let now = crate::utils::now_iso8601();
    let compact: String = now.chars().filter(|c| c.is_ascii_digit()).take(14).collect();
    format!("{compact}-{}", Uuid::new_v4())
}

/// Capture dirty files under any of `filter_paths` into
/// `<root>/.gimera/snapshots/<token>/<relpath>.patch`, then clean the tree.
/// Recurses into every submodule's own working tree so edits across nested
/// repository boundaries are captured before the host's `reset --hard`/
/// `clean -fd` would otherwise destroy them unseen.
pub fn snapshot_recursive(root: &Path, filter_paths: &[PathBuf], token: &str) -> Result<PathBuf> {
    let snapshot_dir = root.join(SNAPSHOT_DIR).join(token);
    std::fs::create_dir_all(&snapshot_dir)?;

    let repo = Repo::discover(root)?;
    capture_repo(&repo, root, Path::new(""), &snapshot_dir, filter_paths)?;

    Ok(snapshot_dir)
}

/// Capture `repo`'s own dirty files, clean its tree, then recurse into each
/// of its submodules. `repo_root_rel` is `repo`'s own path relative to
/// `root`, used to key patch files so `snapshot_restore` can find the right
/// nested repo to reapply them in.
fn capture_repo(repo: &Repo, root: &Path, repo_root_rel: &Path, snapshot_dir: &Path, filter_paths: &[PathBuf]) -> Result<()> {
    let status = repo.status()?;

    let mut dirty_dirs: Vec<PathBuf> = status
        .entries
        .iter()
        .map(|e| e.path.parent().unwrap_or(Path::new("")).to_path_buf())
        .collect();
    dirty_dirs.sort();
    dirty_dirs.dedup();

    for dir in &dirty_dirs {
        let rel_from_root = repo_root_rel.join(dir);
        let abs = root.join(&rel_from_root);
        if !within_any_filter(&abs, filter_paths) {
            continue;
        }

        let rel_files: Vec<String> = status
            .entries
            .iter()
            .filter(|e| e.path.parent().unwrap_or(Path::new("")) == dir.as_path())
            .filter(|e| e.path.file_name().and_then(|n| n.to_str()) != Some(".gitmodules"))
            .map(|e| e.path.to_string_lossy().into_owned())
            .collect();
        if rel_files.is_empty() {
            continue;
        }

        let mut add_args = vec!["add", "--"];
        add_args.extend(rel_files.iter().map(|s| s.as_str()));
        repo.run(&add_args).ok();
        let patch_text = repo.run(&["diff", "--cached", "--relative"]).unwrap_or_default();
        if patch_text.trim().is_empty() {
            continue;
        }

        let dest = snapshot_dir.join(&rel_from_root).with_extension("patch");
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, patch_text)?;
    }

    repo.run(&["reset", "--hard"]).ok();
    repo.run(&["clean", "-fd"]).ok();

    for sub in repo.get_submodules().unwrap_or_default() {
        let sub_repo = Repo::at(repo.path().join(&sub.relpath));
        let sub_root_rel = repo_root_rel.join(&sub.relpath);
        capture_repo(&sub_repo, root, &sub_root_rel, snapshot_dir, filter_paths).ok();
    }

    Ok(())
}

/// Reapply patches captured under `token`, restricted to `filter_paths`.
pub fn snapshot_restore(root: &Path, filter_paths: &[PathBuf], token: &str) -> Result<()> {
    let snapshot_dir = root.join(SNAPSHOT_DIR).join(token);
    if !snapshot_dir.exists() {
        return Ok(());
    }

    for entry in walk_patches(&snapshot_dir)? {
        let rel_target = entry.strip_prefix(&snapshot_dir).unwrap_or(&entry).with_extension("");
        let target_dir = root.join(&rel_target);

        if !filter_paths.is_empty() && !within_any_filter(&target_dir, filter_paths) {
            continue;
        }

        let repo = match Repo::discover(target_dir.parent().unwrap_or(root)) {
            Ok(r) => r,
            Err(_) => continue,
        };

        let delta = target_dir.strip_prefix(repo.path()).unwrap_or(Path::new(""));
        let file_str = entry.to_string_lossy().into_owned();
        let mut args = vec!["apply", "--reject"];
        let delta_arg;
        if delta != Path::new("") {
            delta_arg = format!("--directory={}", delta.display());
            args.push(&delta_arg);
        }
        args.push(&file_str);
        repo.run(&args).ok();
    }

    Ok(())
}

pub fn cleanup(root: &Path, token: &str) -> Result<()> {
    let snapshot_dir = root.join(SNAPSHOT_DIR).join(token);
    if snapshot_dir.exists() {
        std::fs::remove_dir_all(snapshot_dir)?;
    }
    Ok(())
}

pub fn list_tokens(root: &Path) -> Result<Vec<String>> {
    let dir = root.join(SNAPSHOT_DIR);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    out.sort();
    Ok(out)
}

fn within_any_filter(path: &Path, filters: &[PathBuf]) -> bool {
    if filters.is_empty() {
        return true;
    }
    filters.iter().any(|f| path.starts_with(f) || f.starts_with(path))
}

fn walk_patches(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk_patches(&path)?);
        } else if path.extension().and_then(|e| e.to_str()) == Some("patch") {
            out.push(path);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_default_shape() {
        let t = new_token();
        assert!(t.contains('-'));
    }

    #[test]
    fn within_any_filter_matches_ancestor_and_descendant() {
        let filters = vec![PathBuf::from("/root/sub1")];
        assert!(within_any_filter(Path::new("/root/sub1/nested"), &filters));
        assert!(within_any_filter(Path::new("/root"), &filters));
        assert!(!within_any_filter(Path::new("/root/sub2"), &filters));
    }

    #[test]
    fn list_tokens_empty_when_no_snapshots() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list_tokens(tmp.path()).unwrap().is_empty());
    }
}
