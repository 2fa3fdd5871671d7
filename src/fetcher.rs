//! Bounded-parallel fetch of cached repositories ahead of reconciliation.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::Result;

use crate::cache;
use crate::env;
use crate::error::GimeraError;
use crate::manifest::Entry;

/// Fetch the cache for every enabled, distinct-URL entry, honoring
/// `GIMERA_NON_THREADED` and the minimal-fetch shortcut.
///
/// Errors are aggregated: unless `GIMERA_IGNORE_FETCH_ERRORS`, any failure is
/// raised once every worker has finished, rather than failing fast.
pub fn fetch_all(entries: &[&Entry]) -> Result<()> {
    let mut seen = HashSet::new();
    let to_fetch: Vec<&Entry> = entries
        .iter()
        .filter(|e| e.enabled)
        .filter(|e| seen.insert(e.url.clone()))
        .copied()
        .collect();

    if to_fetch.is_empty() {
        return Ok(());
    }

    let failures: Mutex<Vec<(std::path::PathBuf, String)>> = Mutex::new(Vec::new());

    let run_one = |entry: &Entry| {
        if let Err(e) = fetch_one(entry) {
            if env::ignore_fetch_errors() {
                log::warn!("fetch failed for {}: {e}", entry.path);
            } else {
                failures.lock().unwrap().push((std::path::PathBuf::from(&entry.path), e.to_string()));
            }
        }
    };

    if env::non_threaded() || to_fetch.len() == 1 {
        for entry in &to_fetch {
            run_one(entry);
        }
    } else {
        use rayon::prelude::*;
        let pool = rayon::ThreadPoolBuilder::new().num_threads(to_fetch.len().min(4)).build()?;
        pool.install(|| {
            to_fetch.par_iter().for_each(|entry| run_one(entry));
        });
    }

    let failures = failures.into_inner().unwrap();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(GimeraError::Fetch { failures }.into())
    }
}

fn fetch_one(entry: &Entry) -> Result<()> {
    if cache::already_satisfies(&entry.url, entry.sha.as_deref(), &entry.branch) {
        return Ok(());
    }

    let handle = cache::open(&entry.url, None)?;
    let repo = handle.repo();

    let remotes = ["origin"];
    let mut last_err = None;
    for remote in remotes {
        match repo.fetch(remote, &format!("+refs/heads/{}:refs/heads/{}", entry.branch, entry.branch)) {
            Ok(()) => {
                last_err = None;
                break;
            }
            Err(e) => {
                last_err = Some(e);
                // scheme fallback: toggle git<->https for the remote URL and retry once
                if let Some(alt) = alt_scheme_url(&entry.url) {
                    repo.set_remote_url(remote, &alt).ok();
                    if repo.fetch(remote, &format!("+refs/heads/{}:refs/heads/{}", entry.branch, entry.branch)).is_ok() {
                        last_err = None;
                        break;
                    }
                }
            }
        }
    }

    if let Some(e) = last_err {
        return Err(e);
    }

    if let Some(sha) = &entry.sha
        && !repo.contains(sha)
    {
        return Err(GimeraError::CacheIntegrity { url: entry.url.clone(), message: format!("missing {sha} after fetch") }.into());
    }

    Ok(())
}

fn alt_scheme_url(url: &str) -> Option<String> {
    if let Some(rest) = url.strip_prefix("https://") {
        Some(format!("git://{rest}"))
    } else {
        url.strip_prefix("git://").map(|rest| format!("https://{rest}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alt_scheme_toggles_http_and_git() {
        assert_eq!(alt_scheme_url("https://example.com/a.git"), Some("git://example.com/a.git".to_string()));
        assert_eq!(alt_scheme_url("git://example.com/a.git"), Some("https://example.com/a.git".to_string()));
        assert_eq!(alt_scheme_url("ssh://example.com/a.git"), None);
    }

    #[test]
    fn fetch_all_dedupes_by_url() {
        // fetch_all with zero entries is a no-op and must not touch the
        // filesystem or spawn any git process.
        let entries: Vec<Entry> = Vec::new();
        let refs: Vec<&Entry> = entries.iter().collect();
        fetch_all(&refs).unwrap();
    }
}
