//! Patch generation, application, and the edit-patch round trip.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::env;
use crate::error::GimeraError;
use crate::git::Repo;
use crate::manifest::{Entry, Manifest, PatchDirSpec};

/// Apply every `*.patch` file under `entry`'s configured patch directories,
/// in filename order, skipping `ignored_patchfiles` and the currently
/// edited patchfile.
pub fn apply_patches(manifest: &Manifest, entry: &Entry, dest_root: &Path) -> Result<()> {
    if env::do_not_apply_patches() {
        return Ok(());
    }

    for spec in manifest.all_patch_dirs(entry) {
        apply_patch_dir(&spec, entry, dest_root)?;
    }
    Ok(())
}

fn apply_patch_dir(spec: &PatchDirSpec, entry: &Entry, dest_root: &Path) -> Result<()> {
    if !spec.dir.exists() {
        return Ok(());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(&spec.dir)
        .with_context(|| format!("reading patch dir {}", spec.dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("patch"))
        .collect();
    files.sort();

    for file in files {
        let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if entry.ignored_patchfiles.iter().any(|i| i == name) {
            continue;
        }
        if entry.edit_patchfile.as_deref() == Some(name) {
            continue;
        }
        apply_one(&file, &spec.apply_from, dest_root)?;
    }
    Ok(())
}

fn apply_one(file: &Path, apply_from: &Path, dest_root: &Path) -> Result<()> {
    let file_str = file.to_string_lossy().into_owned();
    let result = crate::exec::Cmd::new("patch")
        .args(["-p1", "--no-backup-if-mismatch", "--force", "-s", "-i", &file_str])
        .current_dir(if apply_from.exists() { apply_from } else { dest_root })
        .context(format!("apply {}", file.display()))
        .run_checked();

    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            let err = GimeraError::PatchApply { file: file.to_path_buf(), message: e.to_string() };
            if env::non_interactive() {
                Err(err.into())
            } else {
                log::warn!("{err}");
                Ok(())
            }
        }
    }
}

/// Apply a single named patch onto `entry`'s destination, used to surface an
/// edit-in-progress patch as a working-tree diff.
pub fn apply_single_named(manifest: &Manifest, entry: &Entry, dest_root: &Path, patchfile: &str) -> Result<()> {
    for spec in manifest.all_patch_dirs(entry) {
        let candidate = spec.dir.join(patchfile);
        if candidate.exists() {
            return apply_one(&candidate, &spec.apply_from, dest_root);
        }
    }
    Ok(())
}

/// Capture the current divergence of `entry`'s destination tree into the
/// chosen patch file. `dest_root` must be clean of anything but the
/// intended edits (the apply engine is responsible for the gitignored /
/// scratch-repo branching described in the design document; this function
/// assumes a plain in-place capture against `host_repo`).
pub fn make_patch(host_repo: &Repo, entry: &Entry, dest_relpath: &Path, out_file: &Path) -> Result<()> {
    let dest_str = dest_relpath.to_string_lossy().into_owned();

    // Stage untracked files with -N so they show up in the diff, without
    // making them permanently tracked.
    host_repo.run(&["add", "-N", "--", &dest_str]).ok();
    host_repo.run(&["add", "--", &dest_str])?;
    let staged = host_repo.run(&["diff", "--cached", "--name-only"])?;
    if staged.trim().is_empty() {
        host_repo.run(&["reset", "--", &dest_str]).ok();
        return Ok(());
    }

    host_repo.run(&["commit", "-m", "for patch"])?;
    let patch_text = host_repo.run(&["format-patch", "HEAD~1", "--stdout", "--relative"])?;
    host_repo.run(&["reset", "HEAD~1"])?;

    if let Some(parent) = out_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out_file, patch_text)?;
    Ok(())
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
        std::fs::write(dir.join("base.txt"), "base").unwrap();
        repo.run(&["add", "base.txt"]).unwrap();
        repo.run(&["commit", "-m", "init"]).unwrap();
        repo
    }

    #[test]
    fn make_patch_produces_format_patch_output() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_repo(tmp.path());
        std::fs::create_dir_all(tmp.path().join("sub1")).unwrap();
        std::fs::write(tmp.path().join("sub1/file.txt"), "edit").unwrap();

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
            merges: Vec::new(),
        };
        let out = tmp.path().join("patches/0001.patch");
        make_patch(&repo, &entry, Path::new("sub1"), &out).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("file.txt"));

        let status = repo.status().unwrap();
        assert!(status.is_empty() || status.untracked().any(|p| p.starts_with("patches")));
    }
}
