use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::credentials::mask_key;
use crate::providers::ProviderSlot;

pub const KEYSTORE_FILE_NAME: &str = "keys.json";

/// API keys saved between sessions.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nano_banana_api_key: Option<String>,
}

impl KeyStore {
    /// Missing file means an empty store.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid key store {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, slot: ProviderSlot) -> Option<&str> {
        match slot {
            ProviderSlot::Primary => self.gemini_api_key.as_deref(),
            ProviderSlot::Fallback => self.nano_banana_api_key.as_deref(),
        }
    }

    /// A blank value clears the slot.
    pub fn set(&mut self, slot: ProviderSlot, value: &str) {
        let value = Some(value.trim().to_string()).filter(|value| !value.is_empty());
        match slot {
            ProviderSlot::Primary => self.gemini_api_key = value,
            ProviderSlot::Fallback => self.nano_banana_api_key = value,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn masked(&self, slot: ProviderSlot) -> String {
        match self.get(slot) {
            Some(key) => mask_key(key),
            None => "(not set)".to_string(),
        }
    }
}

pub fn default_keystore_path(home: Option<&Path>) -> PathBuf {
    match home {
        Some(home) => home.join(KEYSTORE_FILE_NAME),
        None => PathBuf::from(".poselab").join(KEYSTORE_FILE_NAME),
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("gemini_api_key", &self.masked(ProviderSlot::Primary))
            .field("nano_banana_api_key", &self.masked(ProviderSlot::Fallback))
            .finish()
    }
}
