use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::providers::ProviderSlot;
use crate::themes::Theme;

/// One image produced for one theme of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub id: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub description: String,
    pub label: String,
    pub provider: ProviderSlot,
    pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn new(
        bytes: Vec<u8>,
        mime_type: Option<String>,
        theme: &Theme,
        provider: ProviderSlot,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            bytes,
            mime_type: mime_type
                .filter(|value| value.starts_with("image/"))
                .unwrap_or_else(|| "image/png".to_string()),
            description: theme.description.clone(),
            label: theme.label.clone(),
            provider,
            created_at: Utc::now(),
        }
    }

    /// File extension matching the payload MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}
