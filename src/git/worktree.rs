//! Scoped resources: ephemeral worktrees and the `stay_at_commit` guard.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use super::Repo;

/// An ephemeral `git worktree` checkout, removed on drop.
///
/// Grounded on the cache/worktree scoping pattern used throughout this
/// codebase: acquire, use, guarantee release even on an error path.
pub struct Worktree {
    repo: Repo,
    path: PathBuf,
    source: Repo,
    removed: bool,
}

impl Worktree {
    /// Check out `commit` from `source` into a fresh temp directory.
    pub fn add(source: &Repo, commit: &str) -> Result<Self> {
        let tmp_root = std::env::temp_dir().join(format!("gimera-wt-{}", Uuid::new_v4()));
        let path_str = tmp_root.to_string_lossy().into_owned();
        source
            .run(&["worktree", "add", "--force", &path_str, commit])
            .with_context(|| format!("git worktree add {commit} failed"))?;
        Ok(Self { repo: Repo::at(&tmp_root), path: tmp_root, source: source.clone(), removed: false })
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the worktree's content into `dest`, preserving the `.git` file
    /// pointer back to `source` so `git worktree remove` keeps working.
    pub fn move_worktree_content(&mut self, dest: &Path) -> Result<()> {
        if dest.exists() {
            if dest.is_dir() {
                std::fs::remove_dir_all(dest)?;
            } else {
                std::fs::remove_file(dest)?;
            }
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let git_pointer = self.path.join(".git");
        let saved_pointer = git_pointer.exists().then(|| std::fs::read_to_string(&git_pointer)).transpose()?;

        std::fs::rename(&self.path, dest)?;
        self.path = dest.to_path_buf();
        self.repo = Repo::at(dest);

        if let Some(pointer) = saved_pointer {
            std::fs::write(dest.join(".git"), pointer)?;
        }
        Ok(())
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        let path_str = self.path.to_string_lossy().into_owned();
        self.source.run(&["worktree", "remove", "--force", &path_str]).ok();
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path).ok();
        }
        self.removed = true;
    }
}

impl Drop for Worktree {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Records `HEAD` at construction; on drop, if `enabled`, soft-resets back to
/// it so new commits made during the scope become staged changes instead of
/// permanent history.
pub struct StayAtCommit {
    repo: Repo,
    initial: Option<String>,
    enabled: bool,
}

impl StayAtCommit {
    pub fn new(repo: Repo, enabled: bool) -> Result<Self> {
        let initial = if enabled { repo.hex().ok() } else { None };
        Ok(Self { repo, initial, enabled })
    }
}

impl Drop for StayAtCommit {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        if let Some(initial) = &self.initial {
            self.repo.run(&["reset", "--soft", initial]).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Cmd;

    fn init_repo(dir: &Path) -> Repo {
        let repo = Repo::at(dir);
        repo.init().unwrap();
        Cmd::new("git").args(["config", "user.email", "a@b.c"]).current_dir(dir).run_checked().unwrap();
        Cmd::new("git").args(["config", "user.name", "a"]).current_dir(dir).run_checked().unwrap();
        std::fs::write(dir.join("f.txt"), "1").unwrap();
        repo.run(&["add", "f.txt"]).unwrap();
        repo.run(&["commit", "-m", "first"]).unwrap();
        repo
    }

    #[test]
    fn worktree_add_and_drop_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_repo(tmp.path());
        let path;
        {
            let wt = Worktree::add(&repo, "HEAD").unwrap();
            path = wt.path().to_path_buf();
            assert!(path.join("f.txt").exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn stay_at_commit_soft_resets_new_commits() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_repo(tmp.path());
        let initial = repo.hex().unwrap();
        {
            let _guard = StayAtCommit::new(repo.clone(), true).unwrap();
            std::fs::write(tmp.path().join("g.txt"), "2").unwrap();
            repo.run(&["add", "g.txt"]).unwrap();
            repo.run(&["commit", "-m", "second"]).unwrap();
        }
        assert_eq!(repo.hex().unwrap(), initial);
        let staged = repo.run(&["diff", "--cached", "--name-only"]).unwrap();
        assert!(staged.contains("g.txt"));
    }
}
