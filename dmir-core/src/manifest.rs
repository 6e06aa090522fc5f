use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::entry::EntryMetadata;
use crate::error::MirrorError;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowStatus {
    Downloaded { bytes_written: u64, elapsed_ms: u64 },
    /// Local copy already present; no transfer made.
    Present,
    /// Excluded by include/exclude patterns.
    Filtered,
    Failed { error: String, bytes_written: u64 },
}

impl RowStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RowStatus::Downloaded { .. } => "downloaded",
            RowStatus::Present => "present",
            RowStatus::Filtered => "filtered",
            RowStatus::Failed { .. } => "FAILED",
        }
    }
}

/// One visited non-folder entry.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ManifestRow {
    pub id: String,
    pub name: String,
    pub remote_path: String,
    pub parents: Vec<String>,
    pub size_bytes: Option<u64>,
    pub kind: String,
    pub modified_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: RowStatus,
}

impl ManifestRow {
    pub fn new(entry: &EntryMetadata, remote_path: String, status: RowStatus) -> Self {
        ManifestRow {
            id: entry.id.to_string(),
            name: entry.name.clone(),
            remote_path,
            parents: entry.parents.iter().map(|p| p.to_string()).collect(),
            size_bytes: entry.size_bytes,
            kind: entry.mime_type.clone().unwrap_or_else(|| "file".to_string()),
            modified_at: entry.modified_at,
            status,
        }
    }

    pub fn parents_display(&self) -> String {
        if self.parents.is_empty() {
            "N/A".to_string()
        } else {
            self.parents.join(", ")
        }
    }
}

/// A sub-folder whose listing could not be completed.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FolderSkip {
    pub id: String,
    pub remote_path: String,
    /// Pages processed before the failure; rows from them are kept.
    pub pages_listed: usize,
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Manifest {
    pub created_utc: String,
    pub root_id: String,
    pub root_name: String,
    pub local_root: String,
    pub rows: Vec<ManifestRow>,
    pub skipped_folders: Vec<FolderSkip>,
    pub cancelled: bool,
}

impl Manifest {
    pub fn new(root: &EntryMetadata, local_root: &Path) -> Self {
        Manifest {
            created_utc: Utc::now().to_rfc3339(),
            root_id: root.id.to_string(),
            root_name: root.name.clone(),
            local_root: local_root.to_string_lossy().to_string(),
            rows: Vec::new(),
            skipped_folders: Vec::new(),
            cancelled: false,
        }
    }

    pub fn summary(&self) -> Summary {
        let mut s = Summary {
            skipped_folders: self.skipped_folders.len(),
            cancelled: self.cancelled,
            ..Summary::default()
        };
        for row in &self.rows {
            match &row.status {
                RowStatus::Downloaded { bytes_written, .. } => {
                    s.downloaded += 1;
                    s.bytes_written += bytes_written;
                }
                RowStatus::Present => s.present += 1,
                RowStatus::Filtered => s.filtered += 1,
                RowStatus::Failed { bytes_written, .. } => {
                    s.failed += 1;
                    s.bytes_written += bytes_written;
                }
            }
        }
        s
    }

    pub fn save_json(&self, path: &Path) -> Result<(), MirrorError> {
        let mut f = File::create(path).map_err(|e| MirrorError::filesystem(path, e))?;
        f.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self, MirrorError> {
        let f = File::open(path).map_err(|e| MirrorError::filesystem(path, e))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(f))?)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub downloaded: usize,
    pub present: usize,
    pub filtered: usize,
    pub failed: usize,
    pub bytes_written: u64,
    pub skipped_folders: usize,
    pub cancelled: bool,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "downloaded {}, present {}, filtered {}, failed {}, {} written, {} folder(s) skipped",
            self.downloaded,
            self.present,
            self.filtered,
            self.failed,
            crate::report::format_size(self.bytes_written),
            self.skipped_folders
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}
