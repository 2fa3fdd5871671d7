//! Top-level reconciliation loop: walk the manifest, force each entry into
//! its declared mode, refresh it, and recurse into nested manifests.

use std::path::{Path, PathBuf};

use anyhow::Result;
use indexmap::IndexMap;

use crate::error::GimeraError;
use crate::exec::TreeLock;
use crate::fetcher;
use crate::git::{Repo, StayAtCommit};
use crate::manifest::{Entry, EntryUpdates, Manifest, RepoType};
use crate::patcher;
use crate::{integrated_refresh, resolver, snapshot};

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub repos: Vec<String>,
    pub update: bool,
    pub force_type: Option<RepoType>,
    pub strict: bool,
    pub recursive: bool,
    pub no_patches: bool,
    pub remove_invalid_branches: bool,
    pub auto_commit: bool,
    pub no_fetch: bool,
    pub migrate_changes: bool,
    pub force: bool,
    pub missing: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            update: false,
            force_type: None,
            strict: true,
            recursive: false,
            no_patches: false,
            remove_invalid_branches: false,
            auto_commit: true,
            no_fetch: false,
            migrate_changes: false,
            force: false,
            missing: false,
        }
    }
}

/// Run a full reconciliation pass against the manifest rooted at `host_dir`.
///
/// Holds `<git_dir>/gimera.lock` for the whole run so a concurrent `gimera
/// apply` invocation against the same tree waits instead of racing.
pub fn apply(host_dir: &Path, opts: &ApplyOptions) -> Result<()> {
    let host = Repo::discover(host_dir)?;
    let _lock = TreeLock::acquire(&host.git_dir())?;
    apply_recursive(host_dir, &IndexMap::new(), opts, true)
}

fn apply_recursive(dir: &Path, parent_vars: &IndexMap<String, String>, opts: &ApplyOptions, is_root: bool) -> Result<()> {
    let host = Repo::discover(dir)?;
    ensure_gitignore_entry(&host, ".gimera")?;

    let mut manifest = Manifest::load(dir, parent_vars)?;

    let selected: Vec<Entry> = manifest
        .entries()
        .iter()
        .filter(|e| e.enabled)
        .filter(|e| opts.repos.is_empty() || opts.repos.iter().any(|r| r == &e.path))
        .cloned()
        .collect();

    if !opts.no_fetch {
        let refs: Vec<&Entry> = selected.iter().collect();
        fetcher::fetch_all(&refs)?;
    }

    let _stay = is_root.then(|| StayAtCommit::new(host.clone(), !opts.auto_commit)).transpose()?;

    let token = opts.migrate_changes.then(snapshot::new_token);
    let filter_paths: Vec<PathBuf> = selected.iter().map(|e| dir.join(&e.path)).collect();
    if let Some(token) = &token {
        snapshot::snapshot_recursive(dir, &filter_paths, token)?;
    }

    let mut force_all_integrated = false;

    for entry in &selected {
        if opts.missing && dir.join(&entry.path).exists() {
            continue;
        }

        let mut effective_type = opts.force_type.unwrap_or(entry.repo_type);
        if force_all_integrated && !opts.strict {
            effective_type = RepoType::Integrated;
        }

        turn_into_correct_repotype(&host, entry, effective_type, opts.force)?;

        match effective_type {
            RepoType::Submodule => {
                let resolved_sha = checkout_submodule(&host, entry, opts)?;
                manifest.store(&entry.path, EntryUpdates { sha: Some(resolved_sha), edit_patchfile: None })?;
                manifest.commit_if_changed(&host)?;
            }
            RepoType::Integrated => {
                if !opts.no_patches {
                    let out_file = dir.join(&entry.path).with_extension("generated.patch");
                    patcher::make_patch(&host, entry, Path::new(&entry.path), &out_file).ok();
                }
                let outcome = integrated_refresh::refresh(&host, &manifest, entry, opts.update)?;
                manifest.store(&entry.path, EntryUpdates { sha: Some(outcome.new_sha), edit_patchfile: None })?;
                manifest.commit_if_changed(&host)?;
                if !opts.strict {
                    force_all_integrated = true;
                }
            }
        }

        if opts.recursive {
            let entry_dir = dir.join(&entry.path);
            if entry_dir.join(crate::manifest::MANIFEST_FILENAME).exists() {
                apply_recursive(&entry_dir, &manifest.vars, opts, false)?;
                host.commit_dir_if_dirty(Path::new(&entry.path), &format!("gimera: updated submodule {}", entry.path), true).ok();
            }
        }
    }

    if let Some(token) = &token {
        snapshot::snapshot_restore(dir, &filter_paths, token)?;
        snapshot::cleanup(dir, token).ok();
    }

    Ok(())
}

fn ensure_gitignore_entry(host: &Repo, pattern: &str) -> Result<()> {
    let path = host.path().join(".gitignore");
    let existing = std::fs::read_to_string(&path).unwrap_or_default();
    if existing.lines().any(|l| l.trim() == pattern) {
        return Ok(());
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(pattern);
    updated.push('\n');
    std::fs::write(&path, updated)?;
    host.commit_dir_if_dirty(Path::new(".gitignore"), "gimera: ignore .gimera", true).ok();
    Ok(())
}

/// If the entry's current materialized form doesn't match its declared
/// type, remove the old form. Installing the new form happens in the
/// type-specific branch that follows.
fn turn_into_correct_repotype(host: &Repo, entry: &Entry, effective_type: RepoType, force: bool) -> Result<()> {
    let state = resolver::get_effective_state(host.path(), &host.path().join(&entry.path))?;

    match effective_type {
        RepoType::Integrated => {
            if state.is_submodule {
                host.force_remove_submodule(Path::new(&entry.path))?;
            }
        }
        RepoType::Submodule => {
            let dest = host.path().join(&entry.path);
            if dest.exists() && !state.is_submodule {
                if host.is_dirty()? && !(force || crate::env::force()) {
                    return Err(GimeraError::DirtyWorkingTree { path: dest }.into());
                }
                std::fs::remove_dir_all(&dest).ok();
            }
        }
    }
    Ok(())
}

/// Check out `entry` as a submodule, returning the commit it now sits at so
/// the caller can write it back as the entry's resolved `sha`.
fn checkout_submodule(host: &Repo, entry: &Entry, opts: &ApplyOptions) -> Result<String> {
    let relpath = Path::new(&entry.path);
    let cache = crate::cache::open(&entry.url, None)?;
    let cache_path_str = cache.path().to_string_lossy().into_owned();

    let already = host.get_submodules().unwrap_or_default().into_iter().any(|s| s.relpath == relpath);
    if !already {
        host.submodule_add(&entry.branch, &cache_path_str, relpath)
            .map_err(|e| GimeraError::SubmoduleAdd { path: relpath.to_path_buf(), message: e.to_string() })?;
    }

    host.run(&["submodule", "update", "--init", "--recursive", "--", &entry.path]).ok();

    let sub = Repo::at(host.path().join(relpath));
    sub.ensure_remote("origin", &entry.url).ok();
    if let Some(sha) = &entry.sha {
        if !sub.contains(sha) {
            sub.fetch("origin", &entry.branch).ok();
        }
        let tip = sub.run(&["rev-parse", &format!("origin/{}", entry.branch)]).unwrap_or_default();
        if tip.trim() == sha {
            sub.run(&["checkout", &entry.branch]).ok();
        } else {
            sub.run(&["checkout", sha]).ok();
        }
    } else {
        sub.run(&["checkout", &entry.branch]).ok();
        if opts.update {
            sub.run(&["pull", "--rebase", "--autostash"]).ok();
        }
    }

    if opts.remove_invalid_branches {
        remove_invalid_branches(&sub, &entry.branch);
    }

    host.commit_dir_if_dirty(relpath, &format!("gimera: update submodule {}", entry.path), false).ok();

    let resolved_sha = sub.run(&["rev-parse", "HEAD"]).unwrap_or_default().trim().to_string();
    Ok(resolved_sha)
}

/// Delete local branches (other than `keep`) that no longer track an upstream ref.
fn remove_invalid_branches(repo: &Repo, keep: &str) {
    let Ok(output) = repo.run(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"]) else {
        return;
    };
    for branch in output.lines().map(str::trim).filter(|b| !b.is_empty() && *b != keep) {
        if repo.run(&["rev-parse", "--abbrev-ref", &format!("{branch}@{{upstream}}")]).is_err() {
            repo.run(&["branch", "-D", branch]).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_strict_and_interactive_friendly() {
        let opts = ApplyOptions::default();
        assert!(opts.strict);
        assert!(opts.auto_commit);
        assert!(!opts.update);
    }
}
