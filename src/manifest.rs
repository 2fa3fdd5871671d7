//! `gimera.yml` parsing, variable substitution, and persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::GimeraError;

pub const MANIFEST_FILENAME: &str = "gimera.yml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Submodule,
    Integrated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Common {
    #[serde(default)]
    pub vars: IndexMap<String, String>,
    #[serde(default)]
    pub patches: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    pub url: String,
    #[serde(deserialize_with = "string_or_number", default)]
    pub branch: String,
    #[serde(rename = "type")]
    pub repo_type: RepoType,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub freeze_sha: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub patches: Vec<String>,
    #[serde(default)]
    pub ignored_patchfiles: Vec<String>,
    #[serde(default)]
    pub edit_patchfile: Option<String>,
    #[serde(default)]
    pub remotes: IndexMap<String, String>,
    #[serde(default)]
    pub merges: Vec<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(serde_yaml::Number),
    }
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => Ok(s),
        StringOrNumber::Number(n) => Ok(n.to_string()),
    }
}

impl Entry {
    /// Merges: `("remote", "ref")` pairs parsed from the `"<remote> <ref>"` string form.
    pub fn merge_pairs(&self) -> Vec<(String, String)> {
        self.merges
            .iter()
            .filter_map(|m| {
                let mut parts = m.splitn(2, ' ');
                Some((parts.next()?.to_string(), parts.next()?.to_string()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestDoc {
    #[serde(default)]
    pub common: Common,
    #[serde(default)]
    pub repos: Vec<Entry>,
}

/// A loaded manifest plus the directory it was loaded from and the fully
/// merged variable map used to expand its entries.
///
/// `raw` is the same document parsed as a bare `serde_yaml::Value` and kept
/// alongside `doc`. Writes patch only the touched keys in `raw` and
/// serialize that, rather than re-emitting `doc` (a typed struct re-emits
/// every field, including defaults that were absent in the original file,
/// and loses the original entry order of untouched fields).
#[derive(Debug, Clone)]
pub struct Manifest {
    pub root: PathBuf,
    pub doc: ManifestDoc,
    pub vars: IndexMap<String, String>,
    raw: serde_yaml::Value,
}

impl Manifest {
    /// Load `<dir>/gimera.yml`, merging `parent_vars` underneath this
    /// manifest's own `common.vars` and expanding `${name}` tokens in every
    /// entry's `url`/`branch`.
    pub fn load(dir: &Path, parent_vars: &IndexMap<String, String>) -> Result<Self> {
        let path = dir.join(MANIFEST_FILENAME);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("no manifest at {}", path.display()))?;
        let mut doc: ManifestDoc = serde_yaml::from_str(&text)
            .map_err(|e| GimeraError::Manifest { message: format!("invalid manifest {}: {e}", path.display()) })?;
        let raw: serde_yaml::Value = serde_yaml::from_str(&text)
            .map_err(|e| GimeraError::Manifest { message: format!("invalid manifest {}: {e}", path.display()) })?;

        let mut vars = parent_vars.clone();
        for (k, v) in &doc.common.vars {
            vars.insert(k.clone(), v.clone());
        }

        validate_paths(&doc.repos).map_err(|e| GimeraError::Manifest { message: e })?;

        for entry in &mut doc.repos {
            entry.url = substitute(&entry.url, &vars)?;
            entry.branch = substitute(&entry.branch, &vars)?;
        }

        Ok(Self { root: dir.to_path_buf(), doc, vars, raw })
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILENAME)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.doc.repos
    }

    pub fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.doc.repos
    }

    pub fn find_entry(&self, relpath: &str) -> Option<&Entry> {
        self.doc.repos.iter().find(|e| e.path == relpath)
    }

    /// Patch directories for `entry`, each paired with the directory patches
    /// inside it must be applied from.
    pub fn all_patch_dirs(&self, entry: &Entry) -> Vec<PatchDirSpec> {
        let mut out = Vec::new();
        let entry_root = self.root.join(&entry.path);
        for p in &entry.patches {
            out.push(PatchDirSpec { dir: self.root.join(expand_path(p)), apply_from: self.root.clone() });
        }
        // Inherited patch dirs declared by a nested manifest's `common.patches`.
        if let Ok(child) = Manifest::load(&entry_root, &self.vars) {
            for p in &child.doc.common.patches {
                out.push(PatchDirSpec { dir: entry_root.join(expand_path(p)), apply_from: entry_root.clone() });
            }
        }
        out
    }

    /// Rewrite the manifest file, updating only the given entry's fields.
    /// Refuses if other files are already staged in the host repo.
    pub fn store(&mut self, relpath: &str, updates: EntryUpdates) -> Result<()> {
        let Some(entry) = self.doc.repos.iter_mut().find(|e| e.path == relpath) else {
            bail!("no such entry: {relpath}");
        };

        let mut new_sha = None;
        if let Some(sha) = updates.sha {
            if !entry.freeze_sha && !crate::env::no_sha_update() {
                entry.sha = Some(sha.clone());
                new_sha = Some(sha);
            }
        }
        let mut new_edit_patchfile = None;
        if let Some(edit_patchfile) = updates.edit_patchfile {
            entry.edit_patchfile = edit_patchfile.clone();
            new_edit_patchfile = Some(edit_patchfile);
        }

        patch_raw_entry(&mut self.raw, relpath, new_sha, new_edit_patchfile)?;
        self.write()
    }

    fn write(&self) -> Result<()> {
        let text = serde_yaml::to_string(&self.raw)?;
        std::fs::write(self.path(), text)?;
        Ok(())
    }

    /// `git add gimera.yml && git commit --no-verify`, refusing if other
    /// files are already staged.
    pub fn commit_if_changed(&self, repo: &crate::git::Repo) -> Result<()> {
        let staged: Vec<_> = repo.status()?.staged().map(|p| p.to_path_buf()).collect();
        if staged.iter().any(|p| p != Path::new(MANIFEST_FILENAME)) {
            bail!("refusing to commit {MANIFEST_FILENAME}: other files are already staged");
        }
        repo.run(&["add", MANIFEST_FILENAME])?;
        let now_staged = repo.run(&["diff", "--cached", "--name-only"])?;
        if now_staged.trim().is_empty() {
            return Ok(());
        }
        repo.run(&["commit", "--no-verify", "-m", "auto update gimera.yml"])?;
        Ok(())
    }

    pub fn add_entry(&mut self, url: String, branch: String, path: String, repo_type: RepoType) -> Result<()> {
        if self.doc.repos.iter().any(|e| e.path == path) {
            bail!("entry already exists at path {path}");
        }

        let mut mapping = serde_yaml::Mapping::new();
        mapping.insert("path".into(), path.clone().into());
        mapping.insert("url".into(), url.clone().into());
        mapping.insert("branch".into(), branch.clone().into());
        mapping.insert("type".into(), repo_type_str(repo_type).into());
        match self.raw.get_mut("repos").and_then(serde_yaml::Value::as_sequence_mut) {
            Some(seq) => seq.push(serde_yaml::Value::Mapping(mapping)),
            None => {
                let root = self
                    .raw
                    .as_mapping_mut()
                    .ok_or_else(|| GimeraError::Manifest { message: "manifest root is not a mapping".to_string() })?;
                root.insert("repos".into(), serde_yaml::Value::Sequence(vec![serde_yaml::Value::Mapping(mapping)]));
            }
        }

        self.doc.repos.push(Entry {
            path,
            url,
            branch,
            repo_type,
            sha: None,
            freeze_sha: false,
            enabled: true,
            patches: Vec::new(),
            ignored_patchfiles: Vec::new(),
            edit_patchfile: None,
            remotes: IndexMap::new(),
            merges: Vec::new(),
        });
        self.write()
    }
}

fn repo_type_str(t: RepoType) -> &'static str {
    match t {
        RepoType::Submodule => "submodule",
        RepoType::Integrated => "integrated",
    }
}

/// Patch `sha`/`edit_patchfile` in place on the matching `repos` entry of a
/// raw manifest document, leaving every other key and entry untouched.
fn patch_raw_entry(raw: &mut serde_yaml::Value, relpath: &str, sha: Option<String>, edit_patchfile: Option<Option<String>>) -> Result<()> {
    let repos = raw
        .get_mut("repos")
        .and_then(serde_yaml::Value::as_sequence_mut)
        .ok_or_else(|| GimeraError::Manifest { message: "manifest has no repos list".to_string() })?;
    let entry = repos
        .iter_mut()
        .find(|e| e.get("path").and_then(serde_yaml::Value::as_str) == Some(relpath))
        .ok_or_else(|| GimeraError::Manifest { message: format!("no such entry: {relpath}") })?;
    let mapping = entry
        .as_mapping_mut()
        .ok_or_else(|| GimeraError::Manifest { message: format!("entry {relpath} is not a mapping") })?;

    if let Some(sha) = sha {
        mapping.insert("sha".into(), sha.into());
    }
    if let Some(edit_patchfile) = edit_patchfile {
        mapping.insert("edit_patchfile".into(), edit_patchfile.map(serde_yaml::Value::from).unwrap_or(serde_yaml::Value::Null));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct EntryUpdates {
    pub sha: Option<String>,
    pub edit_patchfile: Option<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct PatchDirSpec {
    pub dir: PathBuf,
    pub apply_from: PathBuf,
}

fn validate_paths(entries: &[Entry]) -> std::result::Result<(), String> {
    let mut seen = HashMap::new();
    for entry in entries {
        if entry.path.ends_with('/') || entry.path.ends_with('\\') {
            return Err(format!("entry path must not end in a separator: {}", entry.path));
        }
        if seen.insert(entry.path.clone(), ()).is_some() {
            return Err(format!("duplicate entry path: {}", entry.path));
        }
    }
    Ok(())
}

/// Expand a leading `~` in a patch directory entry, following shell
/// conventions, before joining it onto the manifest root.
fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Substitute every `${name}` token against `vars`; error if any remain unresolved.
fn substitute(template: &str, vars: &IndexMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(GimeraError::Manifest { message: format!("unterminated variable reference in {template:?}") }.into());
        };
        let name = &after[..end];
        let value = vars
            .get(name)
            .ok_or_else(|| GimeraError::Manifest { message: format!("unresolved variable ${{{name}}} in {template:?}") })?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, text: &str) {
        std::fs::write(dir.join(MANIFEST_FILENAME), text).unwrap();
    }

    #[test]
    fn loads_and_substitutes_vars() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "common:\n  vars:\n    org: acme\nrepos:\n  - path: sub1\n    url: https://example.com/${org}/repo.git\n    branch: main\n    type: submodule\n",
        );
        let m = Manifest::load(tmp.path(), &IndexMap::new()).unwrap();
        assert_eq!(m.entries()[0].url, "https://example.com/acme/repo.git");
    }

    #[test]
    fn unresolved_variable_errors() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "repos:\n  - path: sub1\n    url: https://example.com/${missing}/repo.git\n    branch: main\n    type: submodule\n",
        );
        assert!(Manifest::load(tmp.path(), &IndexMap::new()).is_err());
    }

    #[test]
    fn duplicate_path_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "repos:\n  - path: sub1\n    url: a\n    branch: main\n    type: submodule\n  - path: sub1\n    url: b\n    branch: main\n    type: integrated\n",
        );
        assert!(Manifest::load(tmp.path(), &IndexMap::new()).is_err());
    }

    #[test]
    fn numeric_branch_coerced_to_string() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "repos:\n  - path: sub1\n    url: a\n    branch: 15\n    type: submodule\n",
        );
        let m = Manifest::load(tmp.path(), &IndexMap::new()).unwrap();
        assert_eq!(m.entries()[0].branch, "15");
    }

    #[test]
    fn store_touches_only_the_matching_entry_and_field() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "repos:\n  - path: sub1\n    url: a\n    branch: main\n    type: submodule\n  - path: sub2\n    url: b\n    branch: main\n    type: integrated\n    freeze_sha: true\n",
        );
        let mut m = Manifest::load(tmp.path(), &IndexMap::new()).unwrap();
        m.store("sub1", EntryUpdates { sha: Some("abc123".to_string()), edit_patchfile: None }).unwrap();

        let text = std::fs::read_to_string(tmp.path().join(MANIFEST_FILENAME)).unwrap();
        let raw: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        let repos = raw["repos"].as_sequence().unwrap();
        assert_eq!(repos[0]["sha"].as_str(), Some("abc123"));
        // Untouched entry keeps its own fields, including ones sub1 never had.
        assert_eq!(repos[1]["freeze_sha"].as_bool(), Some(true));
        assert!(repos[1].get("sha").is_none());
    }

    #[test]
    fn store_respects_freeze_sha() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            "repos:\n  - path: sub1\n    url: a\n    branch: main\n    type: submodule\n    freeze_sha: true\n",
        );
        let mut m = Manifest::load(tmp.path(), &IndexMap::new()).unwrap();
        m.store("sub1", EntryUpdates { sha: Some("abc123".to_string()), edit_patchfile: None }).unwrap();
        assert_eq!(m.entries()[0].sha, None);

        let text = std::fs::read_to_string(tmp.path().join(MANIFEST_FILENAME)).unwrap();
        assert!(!text.contains("abc123"));
    }
}
