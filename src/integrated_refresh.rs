//! Integrated-mode refresh: vendor a commit from the cache into the host
//! tree, folding in configured merges and patches.

use std::path::Path;

use anyhow::Result;

use crate::error::GimeraError;
use crate::git::{Repo, Worktree};
use crate::manifest::{Entry, Manifest};
use crate::patcher;

pub struct RefreshOutcome {
    pub new_sha: String,
}

/// Refresh `entry` (already known to be `type: integrated`) into
/// `<host>/<entry.path>`.
pub fn refresh(host: &Repo, manifest: &Manifest, entry: &Entry, update: bool) -> Result<RefreshOutcome> {
    let commit = if update || entry.sha.is_none() { entry.branch.as_str() } else { entry.sha.as_deref().unwrap() };

    let cache = crate::cache::open(&entry.url, (!update).then_some(entry.sha.as_deref()).flatten())?;
    let cache_repo = cache.repo();
    cache_repo.ensure_remote("origin", &entry.url).ok();

    let mut worktree = Worktree::add(&cache_repo, commit)?;
    let new_sha = worktree.repo().hex()?;

    let mut merge_lines = Vec::new();
    for (remote, reference) in entry.merge_pairs() {
        if let Some(url) = entry.remotes.get(&remote) {
            worktree.repo().ensure_remote(&remote, url).ok();
        }
        worktree.repo().fetch(&remote, &reference).ok();
        worktree
            .repo()
            .run(&["pull", "--no-edit", "--no-rebase", &remote, &reference])
            .map_err(|e| GimeraError::Merge { remote: remote.clone(), reference: reference.clone(), message: e.to_string() })?;
        merge_lines.push(format!("Merging {remote} {reference}"));
    }

    let dest = host.path().join(&entry.path);
    worktree.move_worktree_content(&dest)?;

    let mut message = format!("vendor {} @ {}", entry.path, &new_sha[..new_sha.len().min(12)]);
    for line in &merge_lines {
        message.push('\n');
        message.push_str(line);
    }
    let dest_relpath = Path::new(&entry.path);
    host.run(&["add", "-f", "--", &entry.path])?;
    host.run(&["commit", "--no-verify", "-m", &message]).ok();

    patcher::apply_patches(manifest, entry, &dest)?;

    host.run(&["add", "-f", "--", crate::manifest::MANIFEST_FILENAME]).ok();
    host.commit_dir_if_dirty(dest_relpath, &format!("updated integrated submodule: {}", entry.path), true)?;

    if let Some(edit_patchfile) = &entry.edit_patchfile {
        patcher::apply_single_named(manifest, entry, &dest, edit_patchfile)?;
    }

    Ok(RefreshOutcome { new_sha })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Cmd;

    fn init_bare_with_commit(dir: &Path) -> String {
        let scratch = dir.join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        Cmd::new("git").args(["init"]).current_dir(&scratch).run_checked().unwrap();
        Cmd::new("git").args(["config", "user.email", "a@b.c"]).current_dir(&scratch).run_checked().unwrap();
        Cmd::new("git").args(["config", "user.name", "a"]).current_dir(&scratch).run_checked().unwrap();
        std::fs::write(scratch.join("upstream.txt"), "v1").unwrap();
        Cmd::new("git").args(["add", "upstream.txt"]).current_dir(&scratch).run_checked().unwrap();
        Cmd::new("git").args(["commit", "-m", "v1"]).current_dir(&scratch).run_checked().unwrap();
        Cmd::new("git").args(["branch", "-M", "main"]).current_dir(&scratch).run_checked().unwrap();
        scratch.to_string_lossy().into_owned()
    }

    #[test]
    fn merge_pairs_parses_remote_and_ref() {
        let entry = Entry {
            path: "sub1".into(),
            url: "u".into(),
            branch: "main".into(),
            repo_type: crate::manifest::RepoType::Integrated,
            sha: None,
            freeze_sha: false,
            enabled: true,
            patches: Vec::new(),
            ignored_patchfiles: Vec::new(),
            edit_patchfile: None,
            remotes: Default::default(),
            merges: vec!["variant variant-branch".to_string()],
        };
        assert_eq!(entry.merge_pairs(), vec![("variant".to_string(), "variant-branch".to_string())]);
    }

    #[test]
    fn refresh_vendors_upstream_tree_into_host() {
        let tmp = tempfile::tempdir().unwrap();
        let upstream_url = init_bare_with_commit(tmp.path());

        let host_path = tmp.path().join("host");
        std::fs::create_dir_all(&host_path).unwrap();
        let host = Repo::at(&host_path);
        host.init().unwrap();
        Cmd::new("git").args(["config", "user.email", "a@b.c"]).current_dir(&host_path).run_checked().unwrap();
        Cmd::new("git").args(["config", "user.name", "a"]).current_dir(&host_path).run_checked().unwrap();
        std::fs::write(host_path.join("gimera.yml"), "repos: []\n").unwrap();
        host.run(&["add", "gimera.yml"]).unwrap();
        host.run(&["commit", "-m", "init"]).unwrap();

        let entry = Entry {
            path: "sub1".into(),
            url: format!("file://{upstream_url}"),
            branch: "main".into(),
            repo_type: crate::manifest::RepoType::Integrated,
            sha: None,
            freeze_sha: false,
            enabled: true,
            patches: Vec::new(),
            ignored_patchfiles: Vec::new(),
            edit_patchfile: None,
            remotes: Default::default(),
            merges: Vec::new(),
        };
        let manifest = Manifest { root: host_path.clone(), doc: Default::default(), vars: Default::default() };

        let outcome = refresh(&host, &manifest, &entry, false).unwrap();
        assert_eq!(outcome.new_sha.len(), 40);
        assert!(host_path.join("sub1/upstream.txt").exists());
    }
}
