//! Git plumbing for a single working tree or bare repository.
//!
//! [`Repo`] is the one type this module exposes for git interaction: a path
//! plus a [`RepoKind`] discriminator, rather than a class hierarchy of
//! repo/submodule/bare types. Higher layers (manifest, cache, patcher,
//! apply engine) call through it instead of shelling out to `git` directly.

mod status;
mod submodule;
mod worktree;

pub use status::{RepoStatus, StatusEntry};
pub use submodule::SubmoduleEntry;
pub use worktree::{StayAtCommit, Worktree};

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::exec::Cmd;

/// What kind of thing [`Repo::path`] points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoKind {
    /// A normal repository with a working tree.
    WorkingTree,
    /// A bare repository (cache entries, scratch clones).
    Bare,
    /// A git submodule registered in some parent repository.
    Submodule { parent: PathBuf, relpath: PathBuf },
}

/// A handle onto a single git repository (working tree or bare).
#[derive(Debug, Clone)]
pub struct Repo {
    path: PathBuf,
    kind: RepoKind,
}

impl Repo {
    /// Wrap an existing repository at `path` without touching disk.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), kind: RepoKind::WorkingTree }
    }

    pub fn bare(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), kind: RepoKind::Bare }
    }

    pub fn submodule(path: impl Into<PathBuf>, parent: PathBuf, relpath: PathBuf) -> Self {
        Self { path: path.into(), kind: RepoKind::Submodule { parent, relpath } }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> &RepoKind {
        &self.kind
    }

    pub fn is_bare(&self) -> bool {
        matches!(self.kind, RepoKind::Bare)
    }

    /// `.git` directory for this repo. For a bare repo this is the repo path itself.
    pub fn git_dir(&self) -> PathBuf {
        if self.is_bare() {
            self.path.clone()
        } else {
            self.path.join(".git")
        }
    }

    /// Locate the nearest enclosing repository, walking upward from `start`.
    pub fn discover(start: &Path) -> Result<Self> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(".git").exists() {
                return Ok(Self::at(current));
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => bail!("no git repository found above {}", start.display()),
            }
        }
    }

    fn cmd(&self, args: &[&str]) -> Cmd {
        crate::exec::wait_git_lock(&self.git_dir()).ok();
        Cmd::new("git")
            .args(["-c", "protocol.file.allow=always"])
            .args(args)
            .current_dir(&self.path)
            .context(self.path.display().to_string())
    }

    pub fn run(&self, args: &[&str]) -> Result<String> {
        self.cmd(args).run_checked()
    }

    pub fn run_inherited(&self, args: &[&str]) -> Result<std::process::ExitStatus> {
        self.cmd(args).run_inherited()
    }

    fn run_ok(&self, args: &[&str]) -> bool {
        self.cmd(args).run().map(|o| o.status.success()).unwrap_or(false)
    }

    /// Current `HEAD` commit hash.
    pub fn hex(&self) -> Result<String> {
        self.run(&["rev-parse", "HEAD"])
    }

    /// Current branch name, or `None` if detached.
    pub fn get_branch(&self) -> Option<String> {
        let name = self.run(&["symbolic-ref", "--short", "-q", "HEAD"]).ok()?;
        let name = name.trim();
        if name.is_empty() { None } else { Some(name.to_string()) }
    }

    /// Whether the repo's object store contains `commit`.
    pub fn contains(&self, commit: &str) -> bool {
        self.run_ok(&["cat-file", "-e", &format!("{commit}^{{commit}}")])
    }

    /// Whether `branch` exists as a local branch.
    pub fn contains_branch(&self, branch: &str) -> bool {
        self.run_ok(&["show-ref", "--verify", "-q", &format!("refs/heads/{branch}")])
    }

    /// Whether `ancestor` is an ancestor of (or equal to) `descendant`.
    pub fn contain_commit(&self, ancestor: &str, descendant: &str) -> bool {
        self.run_ok(&["merge-base", "--is-ancestor", ancestor, descendant])
    }

    pub fn status(&self) -> Result<RepoStatus> {
        status::status(self)
    }

    /// True iff anything is dirty other than a lone change to `gimera.yml`.
    pub fn is_dirty(&self) -> Result<bool> {
        let status = self.status()?;
        Ok(status.entries.iter().any(|e| e.path != Path::new("gimera.yml")))
    }

    pub fn get_submodules(&self) -> Result<Vec<SubmoduleEntry>> {
        submodule::list(self)
    }

    pub fn force_remove_submodule(&self, relpath: &Path) -> Result<()> {
        submodule::force_remove(self, relpath)
    }

    pub fn submodule_add(&self, branch: &str, url: &str, relpath: &Path) -> Result<()> {
        submodule::add(self, branch, url, relpath)
    }

    /// `git add` any dirty paths under `path`, commit if anything staged.
    /// Amends with pre-commit hook fixups when configured and allowed.
    pub fn commit_dir_if_dirty(&self, path: &Path, message: &str, force: bool) -> Result<bool> {
        let status = self.status()?;
        let dirty_here: Vec<_> = status
            .entries
            .iter()
            .filter(|e| e.path.starts_with(path))
            .map(|e| e.path.clone())
            .collect();
        if dirty_here.is_empty() {
            return Ok(false);
        }

        let mut add_args = vec!["add"];
        if force {
            add_args.push("-f");
        }
        add_args.push("--");
        let path_str = path.to_string_lossy().into_owned();
        add_args.push(&path_str);
        self.run(&add_args)?;

        let staged = self.run(&["diff", "--cached", "--name-only"])?;
        if staged.trim().is_empty() {
            return Ok(false);
        }

        self.run(&["commit", "--no-verify", "-m", message])?;
        self.maybe_run_precommit_and_amend(path)?;
        Ok(true)
    }

    fn maybe_run_precommit_and_amend(&self, path: &Path) -> Result<()> {
        if crate::env::no_precommit() {
            return Ok(());
        }
        let has_config = self.path.join(".pre-commit-config.yaml").exists()
            || self.path.join(".pre-commit-config.yml").exists();
        if !has_config || which::which("pre-commit").is_err() {
            return Ok(());
        }

        Cmd::new("pre-commit")
            .args(["run", "--from-ref", "HEAD~1", "--to-ref", "HEAD"])
            .current_dir(&self.path)
            .context("pre-commit")
            .run()
            .ok();

        let status = self.status()?;
        let dirty_here = status.entries.iter().any(|e| e.path.starts_with(path));
        if dirty_here {
            let path_str = path.to_string_lossy().into_owned();
            self.run(&["add", "--", &path_str])?;
            let staged = self.run(&["diff", "--cached", "--name-only"])?;
            if !staged.trim().is_empty() {
                self.run(&["commit", "--no-verify", "--amend", "--no-edit"])?;
            }
        }
        Ok(())
    }

    /// Walk up from `<root>/<path>` cleaning and removing now-empty directories.
    pub fn clear_empty_subpaths(&self, relpath: &Path) -> Result<()> {
        let mut current = self.path.join(relpath);
        loop {
            if current.exists() {
                let path_str = current.strip_prefix(&self.path).unwrap_or(&current).to_string_lossy().into_owned();
                Cmd::new("git")
                    .args(["clean", "-fd", "--", &path_str])
                    .current_dir(&self.path)
                    .run()
                    .ok();
                if current.read_dir().map(|mut d| d.next().is_none()).unwrap_or(false) {
                    std::fs::remove_dir(&current).ok();
                }
            }
            if current == self.path {
                break;
            }
            match current.parent() {
                Some(p) => current = p.to_path_buf(),
                None => break,
            }
        }
        Ok(())
    }

    pub fn check_ignore(&self, relpath: &Path) -> bool {
        let path_str = relpath.to_string_lossy().into_owned();
        self.run_ok(&["check-ignore", "-q", &path_str])
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.run(&["remote", "add", name, url]).map(|_| ())
    }

    pub fn set_remote_url(&self, name: &str, url: &str) -> Result<()> {
        self.run(&["remote", "set-url", name, url]).map(|_| ())
    }

    pub fn has_remote(&self, name: &str) -> bool {
        self.run_ok(&["remote", "get-url", name])
    }

    pub fn ensure_remote(&self, name: &str, url: &str) -> Result<()> {
        if self.has_remote(name) {
            self.set_remote_url(name, url)
        } else {
            self.add_remote(name, url)
        }
    }

    pub fn fetch(&self, remote: &str, refspec: &str) -> Result<()> {
        self.run(&["fetch", remote, refspec]).map(|_| ())
    }

    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;
        self.run(&["init"]).map(|_| ())
    }

    pub fn clone_from(&self, url: &str, bare: bool) -> Result<()> {
        let dest = self.path.to_string_lossy().into_owned();
        let mut args = vec!["clone"];
        if bare {
            args.push("--bare");
        }
        args.push(url);
        args.push(&dest);
        Cmd::new("git")
            .args(["-c", "protocol.file.allow=always"])
            .args(args)
            .context(dest.clone())
            .run_checked()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) -> Repo {
        let repo = Repo::at(dir);
        repo.init().unwrap();
        Cmd::new("git").args(["config", "user.email", "a@b.c"]).current_dir(dir).run_checked().unwrap();
        Cmd::new("git").args(["config", "user.name", "a"]).current_dir(dir).run_checked().unwrap();
        repo
    }

    #[test]
    fn discover_walks_up_to_git_dir() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let nested = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let found = Repo::discover(&nested).unwrap();
        assert_eq!(found.path(), tmp.path());
    }

    #[test]
    fn hex_and_branch_after_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_repo(tmp.path());
        std::fs::write(tmp.path().join("f.txt"), "hi").unwrap();
        repo.run(&["add", "f.txt"]).unwrap();
        repo.run(&["commit", "-m", "first"]).unwrap();
        let hex = repo.hex().unwrap();
        assert_eq!(hex.len(), 40);
        assert!(repo.contains(&hex));
    }

    #[test]
    fn is_dirty_ignores_lone_manifest_change() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_repo(tmp.path());
        std::fs::write(tmp.path().join("gimera.yml"), "repos: []\n").unwrap();
        repo.run(&["add", "gimera.yml"]).unwrap();
        repo.run(&["commit", "-m", "init"]).unwrap();
        std::fs::write(tmp.path().join("gimera.yml"), "repos: []\n# changed\n").unwrap();
        assert!(!repo.is_dirty().unwrap());
        std::fs::write(tmp.path().join("other.txt"), "x").unwrap();
        assert!(repo.is_dirty().unwrap());
    }
}
