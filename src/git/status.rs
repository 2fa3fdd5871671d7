//! Porcelain-v1 status parsing.

use std::path::{Path, PathBuf};

use anyhow::Result;

use super::Repo;

#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub path: PathBuf,
    pub index: char,
    pub worktree: char,
}

impl StatusEntry {
    fn is_staged(&self) -> bool {
        matches!(self.index, 'A' | 'M' | 'D')
    }

    fn is_untracked(&self) -> bool {
        (self.index == '?' && self.worktree == '?') || self.index == 'A'
    }

    fn is_dirty_existing(&self) -> bool {
        matches!(self.worktree, 'M' | 'D') || (self.index == 'M' && !self.is_untracked())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepoStatus {
    pub entries: Vec<StatusEntry>,
}

impl RepoStatus {
    pub fn staged(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().filter(|e| e.is_staged()).map(|e| e.path.as_path())
    }

    pub fn dirty_existing(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().filter(|e| e.is_dirty_existing()).map(|e| e.path.as_path())
    }

    pub fn untracked(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().filter(|e| e.is_untracked()).map(|e| e.path.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn status(repo: &Repo) -> Result<RepoStatus> {
    let output = repo.run(&["status", "--porcelain", "--untracked-files=all"])?;
    Ok(RepoStatus { entries: parse(&output) })
}

fn parse(output: &str) -> Vec<StatusEntry> {
    output
        .lines()
        .filter(|line| line.len() >= 3)
        .map(|line| {
            let mut chars = line.chars();
            let index = chars.next().unwrap_or(' ');
            let worktree = chars.next().unwrap_or(' ');
            let rest = &line[3..];
            // Renames report "old -> new"; only the new path matters here.
            let path = rest.split(" -> ").next_back().unwrap_or(rest).trim();
            StatusEntry { path: PathBuf::from(path), index, worktree }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modified_and_untracked() {
        let out = " M tracked.txt\n?? new_file.txt\nA  staged.txt\n";
        let entries = parse(out);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, PathBuf::from("tracked.txt"));
        assert!(entries[0].is_dirty_existing());
        assert!(entries[1].is_untracked());
        assert!(entries[2].is_staged());
        // A staged-but-never-committed new file counts as untracked too.
        assert!(entries[2].is_untracked());
    }

    #[test]
    fn parses_rename() {
        let entries = parse("R  old.txt -> new.txt\n");
        assert_eq!(entries[0].path, PathBuf::from("new.txt"));
    }
}
