use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use poselab_contracts::credentials::CredentialResolver;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{
    api_base_from_env, classify_status_rate_limited, ensure_success, non_empty_env,
    response_json, GenerateRequest, ImageProvider, ProviderImage,
};
use crate::error::GenerationError;

const PROVIDER: &str = "gemini";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Primary provider: multimodal `generateContent` with image+text output.
pub struct GeminiProvider {
    api_base: String,
    model: String,
    credentials: Arc<CredentialResolver>,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(credentials: Arc<CredentialResolver>) -> Self {
        Self {
            api_base: api_base_from_env("GEMINI_API_BASE", DEFAULT_API_BASE),
            model: non_empty_env("GEMINI_IMAGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            credentials,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub(crate) fn build_payload(request: &GenerateRequest) -> Value {
        json!({
            "contents": [{
                "parts": [
                    {
                        "inline_data": {
                            "mime_type": "image/png",
                            "data": request.image_base64,
                        }
                    },
                    { "text": instruction_text(&request.prompt()) },
                ]
            }],
            "generationConfig": {
                "responseModalities": ["image", "text"],
                "imageSafety": "block_only_high",
            },
        })
    }

    /// First inline image of the first candidate.
    pub(crate) fn extract_image(
        response_payload: &Value,
    ) -> Result<ProviderImage, GenerationError> {
        let Some(candidate) = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
        else {
            return Err(GenerationError::no_image(PROVIDER));
        };
        let Some(parts) = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
        else {
            return Err(GenerationError::no_image(PROVIDER));
        };

        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
                GenerationError::transport(PROVIDER, format!("image base64 decode failed: {err}"))
            })?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(ProviderImage { bytes, mime_type });
        }

        Err(GenerationError::no_image(PROVIDER))
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn generate(&self, request: &GenerateRequest) -> Result<ProviderImage, GenerationError> {
        let Some(api_key) = self.credentials.resolve() else {
            return Err(GenerationError::missing_credential(PROVIDER));
        };
        let endpoint = self.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .json(&Self::build_payload(request))
            .send()
            .map_err(|err| {
                GenerationError::transport(PROVIDER, format!("request failed ({endpoint}): {err}"))
            })?;

        let response = ensure_success(PROVIDER, response, classify_status_rate_limited)?;
        let payload = response_json(PROVIDER, response)?;
        Self::extract_image(&payload)
    }
}

fn instruction_text(prompt: &str) -> String {
    format!(
        "Based on this character image, create a new illustration of the SAME character \
with the following changes. Keep the character's design, art style, and colors exactly \
the same, but change the pose/expression/scene as described:\n\n{prompt}\n\n\
Important:\n\
- Maintain the exact same character design and art style\n\
- Keep all distinctive features of the character\n\
- Only change what is specified in the prompt\n\
- Generate a complete, high-quality illustration"
    )
}
