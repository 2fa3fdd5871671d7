//! Bare-repository cache: one clone per distinct URL, shared across entries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::error::GimeraError;
use crate::exec::Cmd;
use crate::git::Repo;

/// Derive a filesystem-safe cache key from a URL.
///
/// Normalizes `git@host:path` to `https://host/path` where possible, strips
/// any `user@` prefix, and replaces characters that are awkward in path
/// segments with `-`.
pub fn cache_key(url: &str) -> String {
    let normalized = if let Some(rest) = url.strip_prefix("git@") {
        rest.split_once(':').map(|(host, path)| format!("https://{host}/{path}")).unwrap_or_else(|| url.to_string())
    } else {
        url.to_string()
    };

    let without_user = match normalized.split_once("://") {
        Some((scheme, rest)) => match rest.split_once('@') {
            Some((_user, host_and_path)) => format!("{scheme}://{host_and_path}"),
            None => normalized.clone(),
        },
        None => normalized.clone(),
    };

    without_user.chars().map(|c| if "?:+[]{}\\/\"'_".contains(c) { '-' } else { c }).collect()
}

fn cache_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".cache").join("gimera")
}

fn required_paths_present(path: &Path) -> bool {
    ["HEAD", "refs", "objects", "config", "info"].iter().all(|p| path.join(p).exists())
}

/// A scoped handle on a populated, URL-keyed bare cache entry.
pub struct CacheHandle {
    golden_path: PathBuf,
    active_path: PathBuf,
    is_fresh: bool,
    committed: bool,
}

impl CacheHandle {
    pub fn repo(&self) -> Repo {
        Repo::bare(&self.active_path)
    }

    pub fn path(&self) -> &Path {
        &self.active_path
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        if self.is_fresh && self.committed && self.active_path != self.golden_path {
            if self.golden_path.exists() {
                std::fs::remove_dir_all(&self.golden_path).ok();
            }
            std::fs::rename(&self.active_path, &self.golden_path).ok();
        } else if self.is_fresh && self.active_path.exists() {
            std::fs::remove_dir_all(&self.active_path).ok();
        }
    }
}

/// Open (creating/repopulating as needed) the cache entry for `url`, verify
/// it contains `required_sha` if given, and return a scoped handle.
///
/// On success the caller should call [`CacheHandle::commit`] once it is
/// satisfied the cache is in a good state; dropping without committing a
/// freshly-populated cache discards the temp directory instead of swapping
/// it into place.
pub fn open(url: &str, required_sha: Option<&str>) -> Result<CacheHandle> {
    let golden_path = cache_root().join(cache_key(url));
    let tarball_path = golden_path.with_extension("tar.gz");

    let mut handle = if required_paths_present(&golden_path) {
        CacheHandle { golden_path: golden_path.clone(), active_path: golden_path.clone(), is_fresh: false, committed: true }
    } else {
        let tmp_path = golden_path.with_file_name(format!(
            "{}-{}",
            golden_path.file_name().and_then(|s| s.to_str()).unwrap_or("cache"),
            Uuid::new_v4()
        ));
        populate(&tmp_path, &tarball_path, url)?;
        CacheHandle { golden_path, active_path: tmp_path, is_fresh: true, committed: false }
    };

    if let Some(sha) = required_sha {
        let repo = handle.repo();
        if !repo.contains(sha) {
            repo.fetch("origin", "+refs/heads/*:refs/heads/*").ok();
            if !repo.contains(sha) {
                return Err(GimeraError::CacheIntegrity { url: url.to_string(), message: format!("missing commit {sha} after fetch") }.into());
            }
        }
    }

    handle.committed = true;
    Ok(handle)
}

fn populate(tmp_path: &Path, tarball_path: &Path, url: &str) -> Result<()> {
    std::fs::create_dir_all(tmp_path.parent().unwrap_or(Path::new(".")))?;

    if tarball_path.exists() {
        std::fs::create_dir_all(tmp_path)?;
        let tar_path = tarball_path.to_string_lossy().into_owned();
        let dest = tmp_path.to_string_lossy().into_owned();
        Cmd::new("tar").args(["xzf", &tar_path, "-C", &dest]).run_checked().with_context(|| format!("failed to extract {}", tarball_path.display()))?;
        return Ok(());
    }

    let repo = Repo::bare(tmp_path);
    repo.clone_from(url, true)?;

    let tar_path = tarball_path.to_string_lossy().into_owned();
    let dest_name = tmp_path.file_name().and_then(|s| s.to_str()).unwrap_or(".").to_string();
    if let Some(parent) = tmp_path.parent() {
        Cmd::new("tar").args(["czf", &tar_path, "-C", &parent.to_string_lossy(), &dest_name]).run().ok();
    }

    Ok(())
}

/// Non-populating check used by the fetcher's minimal-fetch shortcut: does
/// the golden cache already exist and, if `sha` is given, contain it?
pub fn already_satisfies(url: &str, sha: Option<&str>, branch: &str) -> bool {
    let golden_path = cache_root().join(cache_key(url));
    if !required_paths_present(&golden_path) {
        return false;
    }
    let repo = Repo::bare(&golden_path);
    match sha {
        Some(sha) => repo.contains(sha),
        None => repo.contains_branch(branch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_normalizes_ssh_and_strips_user() {
        let k1 = cache_key("git@github.com:acme/repo.git");
        let k2 = cache_key("https://user@github.com/acme/repo.git");
        assert!(!k1.contains(':'));
        assert!(!k2.contains('@'));
    }

    #[test]
    fn cache_key_replaces_special_chars() {
        let k = cache_key("https://example.com/a b/repo.git");
        assert!(!k.contains('/'));
    }

    #[test]
    fn cache_key_is_deterministic_for_equivalent_urls() {
        let a = cache_key("git@github.com:acme/repo.git");
        let b = cache_key("https://github.com/acme/repo.git");
        assert_eq!(a, b);
    }
}
