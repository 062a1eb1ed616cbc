use std::env;

use reqwest::blocking::Response as HttpResponse;
use reqwest::StatusCode;
use serde_json::Value;

use poselab_contracts::themes::Theme;

use crate::error::GenerationError;

mod gemini;
mod nano_banana;

pub use gemini::GeminiProvider;
pub use nano_banana::NanoBananaProvider;

/// Inputs for one themed generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub image_base64: String,
    pub theme: Theme,
    pub extra_prompt: String,
}

impl GenerateRequest {
    pub fn prompt(&self) -> String {
        compose_prompt(&self.theme, &self.extra_prompt)
    }
}

/// Raw image payload returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerateRequest) -> Result<ProviderImage, GenerationError>;
}

/// Theme description, plus the user's extra instructions when present.
pub fn compose_prompt(theme: &Theme, extra_prompt: &str) -> String {
    let extra = extra_prompt.trim();
    if extra.is_empty() {
        return theme.description.clone();
    }
    format!("{}. Additional requirements: {extra}", theme.description)
}

fn api_base_from_env(key: &str, default: &str) -> String {
    non_empty_env(key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

type StatusClassifier = fn(&str, StatusCode, &str) -> Result<(), GenerationError>;

/// Any 2xx passes; everything else is a `ProviderError` carrying the body.
fn classify_status(provider: &str, status: StatusCode, body: &str) -> Result<(), GenerationError> {
    if status.is_success() {
        return Ok(());
    }
    Err(status_error(provider, status, body))
}

fn status_error(provider: &str, status: StatusCode, body: &str) -> GenerationError {
    GenerationError::ProviderError {
        provider: provider.to_string(),
        status: status.as_u16(),
        message: truncate_text(body.trim(), 512),
    }
}

/// Like [`classify_status`], but 429 means the caller should downgrade.
fn classify_status_rate_limited(
    provider: &str,
    status: StatusCode,
    body: &str,
) -> Result<(), GenerationError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GenerationError::rate_limited(provider));
    }
    classify_status(provider, status, body)
}

fn ensure_success(
    provider: &str,
    response: HttpResponse,
    classify: StatusClassifier,
) -> Result<HttpResponse, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(classify(provider, status, &body)
        .err()
        .unwrap_or_else(|| status_error(provider, status, &body)))
}

fn response_json(provider: &str, response: HttpResponse) -> Result<Value, GenerationError> {
    let body = response.text().map_err(|err| {
        GenerationError::transport(provider, format!("response body read failed: {err}"))
    })?;
    serde_json::from_str(&body).map_err(|err| {
        GenerationError::transport(provider, format!("invalid JSON payload: {err}"))
    })
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
