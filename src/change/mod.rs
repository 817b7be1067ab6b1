//! Change detection (spec §4.2): git-aware when the project root is a git
//! repository, content-hash diffing against the ledger otherwise.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::constants::ALWAYS_EXCLUDED;
use crate::state::FileState;

/// Output of one change-detection pass (spec §3.5).
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added_files: Vec<PathBuf>,
    pub modified_files: Vec<PathBuf>,
    /// Relative paths, previously present in the ledger.
    pub deleted_files: Vec<String>,
    /// `(old_relative, new_relative)`. Also present in `modified_files` (as
    /// the new path) so the renamed file gets re-parsed in case its content
    /// changed too (spec §4.2 "Edge policies").
    pub renamed_files: Vec<(String, String)>,
    pub base_commit: Option<String>,
    pub is_git_repo: bool,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.added_files.is_empty()
            || !self.modified_files.is_empty()
            || !self.deleted_files.is_empty()
            || !self.renamed_files.is_empty()
    }

    pub fn total_files(&self) -> usize {
        self.added_files.len() + self.modified_files.len() + self.deleted_files.len()
    }

    /// Files that require (re)parsing: added ∪ modified.
    pub fn files_to_index(&self) -> Vec<PathBuf> {
        let mut files = self.added_files.clone();
        files.extend(self.modified_files.iter().cloned());
        files.sort();
        files.dedup();
        files
    }

    pub fn summary(&self) -> String {
        format!(
            "{} added, {} modified, {} deleted, {} renamed{}",
            self.added_files.len(),
            self.modified_files.len(),
            self.deleted_files.len(),
            self.renamed_files.len(),
            if self.is_git_repo { " (git)" } else { " (hash)" }
        )
    }
}

/// Git `--name-status -M` row, parsed (spec §4.2).
enum StatusRow {
    Added(String),
    Modified(String),
    Deleted(String),
    Renamed(String, String),
}

/// Detects changes via git (preferred) or content hashing (fallback).
pub struct ChangeDetector {
    project_root: PathBuf,
    is_git_repo_cache: Cell<Option<bool>>,
}

impl ChangeDetector {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            is_git_repo_cache: Cell::new(None),
        }
    }

    /// Cached per-instance (spec §4.2 "Caches `is_git_repo` per instance").
    pub fn is_git_repo(&self) -> bool {
        if let Some(cached) = self.is_git_repo_cache.get() {
            return cached;
        }
        let result = Command::new("git")
            .arg("rev-parse")
            .arg("--is-inside-work-tree")
            .current_dir(&self.project_root)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        self.is_git_repo_cache.set(Some(result));
        result
    }

    fn run_git(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.project_root)
            .output()?;
        if !output.status.success() {
            anyhow::bail!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_name_status(&self, raw: &str) -> Vec<StatusRow> {
        let mut rows = Vec::new();
        for line in raw.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let Some(code) = fields.next() else {
                continue;
            };
            match code.chars().next() {
                Some('A') => {
                    if let Some(path) = fields.next() {
                        rows.push(StatusRow::Added(path.to_string()));
                    }
                }
                Some('M') => {
                    if let Some(path) = fields.next() {
                        rows.push(StatusRow::Modified(path.to_string()));
                    }
                }
                Some('D') => {
                    if let Some(path) = fields.next() {
                        rows.push(StatusRow::Deleted(path.to_string()));
                    }
                }
                Some('R') => {
                    // R<similarity>\told\tnew
                    if let (Some(old), Some(new)) = (fields.next(), fields.next()) {
                        rows.push(StatusRow::Renamed(old.to_string(), new.to_string()));
                    }
                }
                Some('C') => {
                    // Copy: treat as add of the new path (spec §4.2).
                    if let (Some(_old), Some(new)) = (fields.next(), fields.next()) {
                        rows.push(StatusRow::Added(new.to_string()));
                    } else if let Some(path) = fields.next() {
                        rows.push(StatusRow::Added(path.to_string()));
                    }
                }
                _ => {}
            }
        }
        rows
    }

    fn rows_to_changeset(&self, rows: Vec<StatusRow>, base_commit: Option<String>) -> ChangeSet {
        let mut changeset = ChangeSet {
            base_commit,
            is_git_repo: true,
            ..Default::default()
        };

        for row in rows {
            match row {
                StatusRow::Added(rel) => {
                    let abs = self.project_root.join(&rel);
                    // Non-existent files in add/modify categories are silently
                    // dropped (spec §4.2 "intermediate untracked deletions").
                    if abs.exists() {
                        changeset.added_files.push(abs);
                    }
                }
                StatusRow::Modified(rel) => {
                    let abs = self.project_root.join(&rel);
                    if abs.exists() {
                        changeset.modified_files.push(abs);
                    }
                }
                StatusRow::Deleted(rel) => {
                    changeset.deleted_files.push(rel);
                }
                StatusRow::Renamed(old, new) => {
                    let new_abs = self.project_root.join(&new);
                    changeset.renamed_files.push((old, new.clone()));
                    // Content may have changed along with the rename; schedule
                    // for re-parse too (spec §4.2).
                    if new_abs.exists() {
                        changeset.modified_files.push(new_abs);
                    }
                }
            }
        }

        changeset
    }

    /// `git diff --cached --name-status -M` (spec §4.2).
    pub fn get_staged_files(&self) -> anyhow::Result<ChangeSet> {
        let raw = self.run_git(&["diff", "--cached", "--name-status", "-M"])?;
        let rows = self.parse_name_status(&raw);
        Ok(self.rows_to_changeset(rows, None))
    }

    /// `git diff --name-status -M <since_commit>..HEAD` (spec §4.2).
    pub fn detect_changes(&self, since_commit: &str) -> anyhow::Result<ChangeSet> {
        let range = format!("{since_commit}..HEAD");
        let raw = self.run_git(&["diff", "--name-status", "-M", &range])?;
        let rows = self.parse_name_status(&raw);
        let head = self.run_git(&["rev-parse", "HEAD"]).ok().map(|s| s.trim().to_string());
        Ok(self.rows_to_changeset(rows, head))
    }

    /// Content-hash fallback: enumerate the workspace and diff against the
    /// ledger (spec §4.2 "Hash strategy").
    pub fn detect_via_hash(
        &self,
        candidate_files: &[PathBuf],
        previous_state: &HashMap<String, FileState>,
    ) -> ChangeSet {
        let mut changeset = ChangeSet {
            is_git_repo: false,
            ..Default::default()
        };

        let mut seen_relative = std::collections::HashSet::new();

        for path in candidate_files {
            if is_in_noise_dir(path) {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&self.project_root) else {
                continue;
            };
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            seen_relative.insert(rel_str.clone());

            let Ok(current) = FileState::from_path(path) else {
                continue;
            };

            match previous_state.get(&rel_str) {
                None => changeset.added_files.push(path.clone()),
                Some(prev) if prev.hash != current.hash || prev.size != current.size => {
                    changeset.modified_files.push(path.clone());
                }
                Some(_) => {}
            }
        }

        for rel in previous_state.keys() {
            if !seen_relative.contains(rel) {
                changeset.deleted_files.push(rel.clone());
            }
        }

        changeset
    }
}

/// Directories always skipped regardless of include/exclude configuration
/// (spec §4.2 "Skip common noise directories").
fn is_in_noise_dir(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| ALWAYS_EXCLUDED.contains(&s) || s == ".git")
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn detect_via_hash_finds_added_modified_deleted() {
        let dir = tempdir().unwrap();
        let detector = ChangeDetector::new(dir.path());

        let foo = dir.path().join("foo.py");
        fs::write(&foo, "print(1)").unwrap();
        let bar = dir.path().join("bar.py");
        fs::write(&bar, "print(2)").unwrap();

        let mut previous = HashMap::new();
        previous.insert(
            "bar.py".to_string(),
            FileState {
                hash: "stale".to_string(),
                size: 999,
                mtime: 0.0,
            },
        );
        previous.insert(
            "gone.py".to_string(),
            FileState {
                hash: "whatever".to_string(),
                size: 1,
                mtime: 0.0,
            },
        );

        let changeset = detector.detect_via_hash(&[foo.clone(), bar.clone()], &previous);

        assert_eq!(changeset.added_files, vec![foo]);
        assert_eq!(changeset.modified_files, vec![bar]);
        assert_eq!(changeset.deleted_files, vec!["gone.py".to_string()]);
        assert!(!changeset.is_git_repo);
    }

    #[test]
    fn detect_via_hash_is_empty_when_nothing_changed() {
        let dir = tempdir().unwrap();
        let detector = ChangeDetector::new(dir.path());

        let foo = dir.path().join("foo.py");
        fs::write(&foo, "print(1)").unwrap();
        let state = FileState::from_path(&foo).unwrap();

        let mut previous = HashMap::new();
        previous.insert("foo.py".to_string(), state);

        let changeset = detector.detect_via_hash(&[foo], &previous);
        assert!(!changeset.has_changes());
    }

    #[test]
    fn parse_name_status_handles_all_codes() {
        let detector = ChangeDetector::new(PathBuf::from("."));
        let raw = "A\tnew.py\nM\tchanged.py\nD\tgone.py\nR95\told.py\trenamed.py\nC100\torig.py\tcopy.py\n";
        let rows = detector.parse_name_status(raw);
        assert_eq!(rows.len(), 5);
        assert!(matches!(rows[0], StatusRow::Added(ref p) if p == "new.py"));
        assert!(matches!(rows[1], StatusRow::Modified(ref p) if p == "changed.py"));
        assert!(matches!(rows[2], StatusRow::Deleted(ref p) if p == "gone.py"));
        assert!(matches!(rows[3], StatusRow::Renamed(ref a, ref b) if a == "old.py" && b == "renamed.py"));
        assert!(matches!(rows[4], StatusRow::Added(ref p) if p == "copy.py"));
    }

    #[test]
    fn files_to_index_is_union_of_added_and_modified() {
        let changeset = ChangeSet {
            added_files: vec![PathBuf::from("a.py")],
            modified_files: vec![PathBuf::from("b.py")],
            ..Default::default()
        };
        let files = changeset.files_to_index();
        assert_eq!(files, vec![PathBuf::from("a.py"), PathBuf::from("b.py")]);
    }
}
