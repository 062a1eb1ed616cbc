use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;

use crate::error::GenerationError;

pub const MAX_SOURCE_BYTES: u64 = 10 * 1024 * 1024;

const ACCEPTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// The uploaded character image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    bytes: Vec<u8>,
    mime_type: String,
}

impl SourceImage {
    pub fn load(path: &Path) -> Result<Self, GenerationError> {
        let format = ImageFormat::from_path(path).map_err(|_| {
            GenerationError::InvalidInput(format!("unsupported file type: {}", path.display()))
        })?;
        let mime_type = format.to_mime_type();
        if !ACCEPTED_MIME_TYPES.contains(&mime_type) {
            return Err(GenerationError::InvalidInput(format!(
                "unsupported file type {mime_type}: {}",
                path.display()
            )));
        }
        let size = fs::metadata(path)
            .map_err(|err| {
                GenerationError::InvalidInput(format!("failed reading {}: {err}", path.display()))
            })?
            .len();
        if size > MAX_SOURCE_BYTES {
            return Err(oversized(size));
        }
        let bytes = fs::read(path).map_err(|err| {
            GenerationError::InvalidInput(format!("failed reading {}: {err}", path.display()))
        })?;
        Self::from_bytes(bytes, mime_type)
    }

    pub fn from_bytes(bytes: Vec<u8>, mime_type: &str) -> Result<Self, GenerationError> {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        if !ACCEPTED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(GenerationError::InvalidInput(format!(
                "unsupported file type {mime_type}"
            )));
        }
        if bytes.len() as u64 > MAX_SOURCE_BYTES {
            return Err(oversized(bytes.len() as u64));
        }
        if image::guess_format(&bytes).is_err() {
            return Err(GenerationError::InvalidInput(
                "file content is not a recognized image".to_string(),
            ));
        }
        Ok(Self { bytes, mime_type })
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    pub fn mime_type(&self) -> &str {
        self.mime_type.as_str()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }
}

fn oversized(size: u64) -> GenerationError {
    GenerationError::InvalidInput(format!(
        "file is {size} bytes; the limit is {MAX_SOURCE_BYTES}"
    ))
}
