use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::{Builder, NamedTempFile, TempPath};

use crate::domain::Variable;
use crate::error::ProfileError;
use crate::request::FetchTask;

pub const DEFAULT_OUTPUT_ROOT: &str = "assets";

/// On-disk layout: one directory per variable for fetched subsets, `merged/`
/// for per-event profiles, `manifest.json` for the last run summary.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn variable_dir(&self, variable: Variable) -> Utf8PathBuf {
        self.root.join(variable.as_str())
    }

    pub fn fetch_path(&self, task: &FetchTask) -> Utf8PathBuf {
        self.root.join(&task.relative_path)
    }

    pub fn merged_dir(&self) -> Utf8PathBuf {
        self.root.join("merged")
    }

    pub fn merged_path(&self, event_id: &str, date: &DateTime<Utc>) -> Utf8PathBuf {
        self.merged_dir().join(format!(
            "all_{}_{}.nc",
            file_component(event_id),
            date.format("%Y%m%d")
        ))
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.root.join("manifest.json")
    }

    /// Creates the root and proves it is writable.
    pub fn ensure_root(&self) -> Result<(), ProfileError> {
        fs::create_dir_all(self.root.as_std_path()).map_err(|err| {
            ProfileError::Filesystem(format!("create output root {}: {err}", self.root))
        })?;
        Builder::new()
            .prefix(".narr-profiles-probe")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| {
                ProfileError::Filesystem(format!("output root {} is not writable: {err}", self.root))
            })?;
        Ok(())
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), ProfileError> {
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| ProfileError::Filesystem(format!("create {path}: {err}")))
    }

    /// True when `path` exists and holds at least one byte.
    pub fn is_populated(path: &Utf8Path) -> bool {
        fs::metadata(path.as_std_path())
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// Temp file in the destination's directory, ready for `persist`.
    pub fn staging_file(dest: &Utf8Path) -> Result<NamedTempFile, ProfileError> {
        let parent = dest
            .parent()
            .ok_or_else(|| ProfileError::Filesystem(format!("invalid destination path {dest}")))?;
        Self::ensure_dir(parent)?;
        Builder::new()
            .prefix(".partial-")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| ProfileError::Filesystem(format!("stage {dest}: {err}")))
    }

    pub fn persist(temp: NamedTempFile, dest: &Utf8Path) -> Result<(), ProfileError> {
        temp.persist(dest.as_std_path())
            .map_err(|err| ProfileError::Filesystem(format!("persist {dest}: {err}")))?;
        Ok(())
    }

    /// Closed staging path for writers that open files by name.
    pub fn staging_path(dest: &Utf8Path) -> Result<TempPath, ProfileError> {
        Ok(Self::staging_file(dest)?.into_temp_path())
    }

    pub fn persist_path(temp: TempPath, dest: &Utf8Path) -> Result<(), ProfileError> {
        temp.persist(dest.as_std_path())
            .map_err(|err| ProfileError::Filesystem(format!("persist {dest}: {err}")))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ProfileError> {
        let temp = Self::staging_file(path)?;
        fs::write(temp.path(), content)
            .map_err(|err| ProfileError::Filesystem(format!("write {path}: {err}")))?;
        Self::persist(temp, path)
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), ProfileError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| ProfileError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }
}

fn safe_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_')
}

/// Event id as a file-name component. Safe ids pass through unchanged; any
/// other id is sanitized and suffixed with `~` plus a hash of the raw id, so
/// distinct ids never share a name (`~` never survives sanitizing).
fn file_component(value: &str) -> String {
    if !value.is_empty() && value.chars().all(safe_char) {
        return value.to_string();
    }
    let sanitized: String = value
        .chars()
        .map(|ch| if safe_char(ch) { ch } else { '_' })
        .collect();
    let digest = hex::encode(Sha256::digest(value.as_bytes()));
    format!("{sanitized}~{}", &digest[..16])
}
