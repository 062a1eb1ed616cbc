use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE_NAME: &str = "batch.json";
pub const MANIFEST_SCHEMA_VERSION: u64 = 1;

const FILE_NAME_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestImage {
    pub id: String,
    pub label: String,
    pub description: String,
    pub provider: String,
    pub file: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFailure {
    pub label: String,
    pub provider: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,
    pub batch_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub active_provider: String,
    #[serde(default)]
    pub extra_prompt: String,
    #[serde(default)]
    pub images: Vec<ManifestImage>,
    #[serde(default)]
    pub failures: Vec<ManifestFailure>,
    /// Labels drawn by earlier batches written to the same directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_labels: Vec<String>,
}

impl BatchManifest {
    /// Every label this directory has seen: earlier batches first, then this
    /// batch's successes and failures. Duplicates keep their first position.
    pub fn used_labels(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.previous_labels
            .iter()
            .chain(self.images.iter().map(|image| &image.label))
            .chain(self.failures.iter().map(|failure| &failure.label))
            .filter(|label| seen.insert(label.as_str()))
            .cloned()
            .collect()
    }

    /// Inherits the history of the manifest this one replaces.
    pub fn carry_forward(&mut self, previous: &BatchManifest) {
        self.previous_labels = previous.used_labels();
    }
}

pub fn write_manifest(path: &Path, manifest: &BatchManifest) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(manifest)?)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

/// `None` when the manifest is missing or unreadable.
pub fn read_manifest(path: &Path) -> Option<BatchManifest> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Strips characters that are invalid in file names, turns every whitespace
/// run (leading and trailing ones included) into a single `_`, and caps the
/// length.
pub fn sanitize_file_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for ch in name
        .chars()
        .filter(|ch| !matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
    {
        if ch.is_whitespace() {
            if !in_whitespace {
                sanitized.push('_');
            }
            in_whitespace = true;
        } else {
            sanitized.push(ch);
            in_whitespace = false;
        }
    }
    sanitized.chars().take(FILE_NAME_MAX_CHARS).collect()
}

/// `{NN}_{label}_{YYYYMMDD_HHMMSS}.{ext}`, with `NN` one-based.
pub fn image_file_name(index: usize, label: &str, stamp: &str, ext: &str) -> String {
    format!(
        "{:02}_{}_{}.{}",
        index + 1,
        sanitize_file_name(label),
        stamp,
        ext
    )
}

pub fn file_stamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn default_schema_version() -> u64 {
    MANIFEST_SCHEMA_VERSION
}
