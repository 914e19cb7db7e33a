//! Per-run result persistence.
//!
//! Layout: `<root>/<YYYY-MM-DD>/<HH-MM-SS>_<workflow>/` holding one
//! `node_<NN>_<type>.json` per node result, optional `.jpg` artifacts for
//! image fields, and a run-level `metadata.json`. Timestamps are UTC.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use infercore::{NodeResult, RunStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Data fields holding base64 images, and the artifact suffix each maps to.
const IMAGE_FIELDS: [(&str, &str); 2] = [("image", ""), ("original_image", "_original")];

const METADATA_FILE: &str = "metadata.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory of one run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub dir: PathBuf,
}

/// Run-level summary written as `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

/// What a retention sweep removed, or would remove in dry-run mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupStats {
    pub cutoff_date: NaiveDate,
    pub dry_run: bool,
    pub dates: Vec<String>,
    pub runs: usize,
    pub files: usize,
    pub bytes: u64,
}

pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory for a new run.
    pub async fn begin_run(
        &self,
        workflow_name: &str,
        started_at: DateTime<Utc>,
    ) -> Result<RunHandle, StoreError> {
        let date_dir = self.root.join(started_at.format("%Y-%m-%d").to_string());
        let base = format!(
            "{}_{}",
            started_at.format("%H-%M-%S"),
            sanitize_name(workflow_name)
        );

        let mut dir = date_dir.join(&base);
        let mut attempt = 1;
        while tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            attempt += 1;
            dir = date_dir.join(format!("{base}_{attempt}"));
        }

        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        tracing::debug!("Created result directory {}", dir.display());
        Ok(RunHandle { dir })
    }

    /// Persist one node envelope. Image fields are written as sibling
    /// artifacts and replaced by `true` in the JSON document.
    pub async fn save_node_result(
        &self,
        run: &RunHandle,
        seq: usize,
        result: &NodeResult,
    ) -> Result<PathBuf, StoreError> {
        let stem = format!("node_{:02}_{}", seq, sanitize_name(&result.node_type));
        let mut document = serde_json::to_value(result)?;

        if let Some(Value::Object(data)) = document.get_mut("data") {
            for (field, suffix) in IMAGE_FIELDS {
                let Some(Value::String(encoded)) = data.get(field) else {
                    continue;
                };
                match decode_image(encoded) {
                    Ok(bytes) => {
                        let path = run.dir.join(format!("{stem}{suffix}.jpg"));
                        tokio::fs::write(&path, bytes).await.map_err(io_err(&path))?;
                    }
                    Err(e) => tracing::warn!(
                        "Node {} field '{}' is not valid base64, artifact skipped: {}",
                        result.node_id,
                        field,
                        e
                    ),
                }
                data.insert(field.to_string(), Value::Bool(true));
            }
        }

        let path = run.dir.join(format!("{stem}.json"));
        let json = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(&path, json).await.map_err(io_err(&path))?;
        Ok(path)
    }

    pub async fn finish_run(
        &self,
        run: &RunHandle,
        metadata: &RunMetadata,
    ) -> Result<PathBuf, StoreError> {
        let path = run.dir.join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(&path, json).await.map_err(io_err(&path))?;
        Ok(path)
    }

    /// Delete (or, with `dry_run`, only report) date directories older than
    /// `retention_days` days.
    pub fn cleanup_old_results(
        &self,
        retention_days: u32,
        dry_run: bool,
    ) -> Result<CleanupStats, StoreError> {
        let cutoff = Utc::now().date_naive() - ChronoDuration::days(i64::from(retention_days));
        self.cleanup_before(cutoff, dry_run)
    }

    /// Sweep every date directory strictly before `cutoff`.
    pub fn cleanup_before(
        &self,
        cutoff: NaiveDate,
        dry_run: bool,
    ) -> Result<CleanupStats, StoreError> {
        let mut stats = CleanupStats {
            cutoff_date: cutoff,
            dry_run,
            dates: Vec::new(),
            runs: 0,
            files: 0,
            bytes: 0,
        };
        if !self.root.exists() {
            return Ok(stats);
        }

        let mut expired = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(date) = NaiveDate::parse_from_str(&name, "%Y-%m-%d") else {
                continue;
            };
            if date < cutoff {
                expired.push((name, path));
            }
        }
        expired.sort();

        for (name, path) in expired {
            for run in std::fs::read_dir(&path).map_err(io_err(&path))? {
                let run = run.map_err(io_err(&path))?;
                if run.path().is_dir() {
                    stats.runs += 1;
                }
            }
            let (files, bytes) = tally(&path)?;
            stats.files += files;
            stats.bytes += bytes;

            if dry_run {
                tracing::info!("Would delete {} ({} files, {} bytes)", path.display(), files, bytes);
            } else {
                std::fs::remove_dir_all(&path).map_err(io_err(&path))?;
                tracing::info!("Deleted {} ({} files, {} bytes)", path.display(), files, bytes);
            }
            stats.dates.push(name);
        }

        Ok(stats)
    }
}

fn tally(dir: &Path) -> Result<(usize, u64), StoreError> {
    let mut files = 0;
    let mut bytes = 0;
    for entry in std::fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if path.is_dir() {
            let (f, b) = tally(&path)?;
            files += f;
            bytes += b;
        } else {
            files += 1;
            bytes += std::fs::metadata(&path).map_err(io_err(&path))?.len();
        }
    }
    Ok((files, bytes))
}

fn decode_image(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    // accept data URLs as well as bare base64
    let payload = match encoded.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => encoded,
    };
    STANDARD.decode(payload.trim())
}

/// Make a string safe for use in a path component.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(50)
        .collect();
    if cleaned.is_empty() {
        "workflow".to_string()
    } else {
        cleaned
    }
}
