//! Effective-state resolution: given a path, find which manifest and which
//! git repository own it.

use std::path::{Path, PathBuf};

use anyhow::Result;
use indexmap::IndexMap;

use crate::git::Repo;
use crate::manifest::{Manifest, MANIFEST_FILENAME};

#[derive(Debug, Clone)]
pub struct EffectiveState {
    pub closest_gimera: PathBuf,
    pub parent_gimera: PathBuf,
    pub parent_repo: PathBuf,
    pub parent_gimera_relpath: PathBuf,
    pub parent_repo_relpath: PathBuf,
    pub is_submodule: bool,
}

/// Walk upward from `path`'s parent to `root`, returning the nearest
/// directory (inclusive of `root`) that contains a `gimera.yml`.
pub fn closest_gimera(root: &Path, path: &Path) -> PathBuf {
    let mut current = path.parent().unwrap_or(path).to_path_buf();
    loop {
        if current.join(MANIFEST_FILENAME).exists() {
            return current;
        }
        if current == root {
            return root.to_path_buf();
        }
        match current.parent() {
            Some(p) if p.starts_with(root) || p == root => current = p.to_path_buf(),
            _ => return root.to_path_buf(),
        }
    }
}

/// Descend the submodule tree from `end` toward `start`, returning the
/// deepest enclosing repository.
pub fn get_nearest_repo(end: &Path, start: &Path) -> Result<Repo> {
    let mut repo = Repo::at(end);
    loop {
        let subs = repo.get_submodules().unwrap_or_default();
        let next = subs.into_iter().find(|s| start.starts_with(repo.path().join(&s.relpath)) || start == repo.path().join(&s.relpath));
        match next {
            Some(sub) => repo = Repo::at(repo.path().join(&sub.relpath)),
            None => return Ok(repo),
        }
    }
}

pub fn get_effective_state(root: &Path, path: &Path) -> Result<EffectiveState> {
    let closest = closest_gimera(root, path);

    let rel_from_closest = path.strip_prefix(&closest).unwrap_or(path).to_path_buf();
    let is_own_boundary = if closest.join(MANIFEST_FILENAME).exists() {
        let manifest = Manifest::load(&closest, &IndexMap::new())?;
        manifest.find_entry(&rel_from_closest.to_string_lossy()).is_some()
    } else {
        false
    };

    let parent_gimera = if is_own_boundary {
        closest.clone()
    } else if closest == root {
        root.to_path_buf()
    } else {
        closest_gimera(root, closest.parent().unwrap_or(root))
    };

    let parent_repo = if parent_gimera == root {
        root.to_path_buf()
    } else {
        get_nearest_repo(root, &parent_gimera)?.path().to_path_buf()
    };

    let is_submodule = {
        let repo = Repo::at(&parent_repo);
        let relpath = path.strip_prefix(&parent_repo).unwrap_or(path);
        repo.get_submodules().unwrap_or_default().iter().any(|s| s.relpath == relpath)
    };

    Ok(EffectiveState {
        closest_gimera: closest.clone(),
        parent_gimera: parent_gimera.clone(),
        parent_repo: parent_repo.clone(),
        parent_gimera_relpath: path.strip_prefix(&parent_gimera).unwrap_or(path).to_path_buf(),
        parent_repo_relpath: path.strip_prefix(&parent_repo).unwrap_or(path).to_path_buf(),
        is_submodule,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_gimera_finds_nearest_ancestor_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(MANIFEST_FILENAME), "repos: []\n").unwrap();
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(closest_gimera(tmp.path(), &nested), tmp.path());
    }

    #[test]
    fn closest_gimera_falls_back_to_root() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(closest_gimera(tmp.path(), &nested), tmp.path());
    }
}
