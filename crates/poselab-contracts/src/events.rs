use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::ProviderSlot;

/// Everything a batch reports while it runs, one variant per log line kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStarted {
        total: usize,
        extra_prompt: String,
        active_provider: ProviderSlot,
    },
    ThemeStarted {
        index: usize,
        label: String,
        provider: ProviderSlot,
    },
    ProviderDowngraded {
        from: String,
        to: String,
        label: String,
    },
    ThemeFailed {
        index: usize,
        label: String,
        provider: ProviderSlot,
        kind: String,
        error: String,
    },
    ImageGenerated {
        index: usize,
        id: String,
        label: String,
        provider: ProviderSlot,
        bytes: usize,
    },
    BatchFinished {
        generated: usize,
        failed: usize,
        active_provider: ProviderSlot,
    },
}

impl BatchEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BatchStarted { .. } => "batch_started",
            Self::ThemeStarted { .. } => "theme_started",
            Self::ProviderDowngraded { .. } => "provider_downgraded",
            Self::ThemeFailed { .. } => "theme_failed",
            Self::ImageGenerated { .. } => "image_generated",
            Self::BatchFinished { .. } => "batch_finished",
        }
    }
}

/// One line of `events.jsonl`: the event stamped with its batch and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub batch_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub event: BatchEvent,
}

/// Appends [`EventRecord`]s for a single batch. Clones share the file lock.
#[derive(Debug, Clone)]
pub struct EventWriter {
    log: Arc<BatchLog>,
}

#[derive(Debug)]
struct BatchLog {
    path: PathBuf,
    batch_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, batch_id: impl Into<String>) -> Self {
        Self {
            log: Arc::new(BatchLog {
                path: path.into(),
                batch_id: batch_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }

    pub fn batch_id(&self) -> &str {
        &self.log.batch_id
    }

    pub fn emit(&self, event: BatchEvent) -> anyhow::Result<EventRecord> {
        let record = EventRecord {
            batch_id: self.log.batch_id.clone(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self
            .log
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("batch event log lock poisoned"))?;
        if let Some(parent) = self.log.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed appending to {}", self.log.path.display()))?;
        Ok(record)
    }

    /// Every record in file order. Lines that do not parse are skipped.
    pub fn read_events(&self) -> anyhow::Result<Vec<EventRecord>> {
        let raw = std::fs::read_to_string(&self.log.path)
            .with_context(|| format!("failed reading {}", self.log.path.display()))?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<EventRecord>(line).ok())
            .collect())
    }

    pub fn read_kinds(&self) -> anyhow::Result<Vec<&'static str>> {
        Ok(self
            .read_events()?
            .iter()
            .map(|record| record.event.kind())
            .collect())
    }
}
