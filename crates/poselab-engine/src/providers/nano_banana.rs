use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use poselab_contracts::credentials::CredentialResolver;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use super::{
    api_base_from_env, classify_status, ensure_success, response_json, GenerateRequest,
    ImageProvider, ProviderImage,
};
use crate::error::GenerationError;

const PROVIDER: &str = "nano_banana";
const DEFAULT_API_BASE: &str = "https://api.nanobanana.pro/v1";
const OUTPUT_SIZE: &str = "1024x1024";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Fallback provider: bearer-authenticated image-edit endpoint.
pub struct NanoBananaProvider {
    api_base: String,
    credentials: Arc<CredentialResolver>,
    http: HttpClient,
}

/// Where the edit response put the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EditOutput {
    Inline(ProviderImage),
    Url(String),
}

impl NanoBananaProvider {
    pub fn new(credentials: Arc<CredentialResolver>) -> Self {
        Self {
            api_base: api_base_from_env("NANO_BANANA_API_BASE", DEFAULT_API_BASE),
            credentials,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/images/edits", self.api_base)
    }

    pub(crate) fn build_payload(request: &GenerateRequest) -> Value {
        json!({
            "image": request.image_base64,
            "prompt": format!(
                "Transform this character illustration: {}. Maintain the same character design and art style.",
                request.prompt()
            ),
            "n": 1,
            "size": OUTPUT_SIZE,
        })
    }

    pub(crate) fn extract_output(response_payload: &Value) -> Result<EditOutput, GenerationError> {
        let Some(first) = response_payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(Value::as_object)
        else {
            return Err(GenerationError::no_image(PROVIDER));
        };

        if let Some(b64) = first
            .get("b64_json")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
        {
            let bytes = BASE64.decode(b64.as_bytes()).map_err(|err| {
                GenerationError::transport(PROVIDER, format!("image base64 decode failed: {err}"))
            })?;
            return Ok(EditOutput::Inline(ProviderImage {
                bytes,
                mime_type: None,
            }));
        }
        if let Some(url) = first
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return Ok(EditOutput::Url(url.to_string()));
        }

        Err(GenerationError::no_image(PROVIDER))
    }

    fn download_image(&self, url: &str) -> Result<ProviderImage, GenerationError> {
        let response = self
            .http
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .map_err(|err| {
                GenerationError::transport(
                    PROVIDER,
                    format!("image download failed ({url}): {err}"),
                )
            })?;
        let response = ensure_success(PROVIDER, response, classify_status)?;
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(|err| {
                GenerationError::transport(PROVIDER, format!("failed reading image bytes: {err}"))
            })?
            .to_vec();
        if bytes.is_empty() {
            return Err(GenerationError::no_image(PROVIDER));
        }
        Ok(ProviderImage { bytes, mime_type })
    }
}

impl ImageProvider for NanoBananaProvider {
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
            .bearer_auth(&api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&Self::build_payload(request))
            .send()
            .map_err(|err| {
                GenerationError::transport(PROVIDER, format!("request failed ({endpoint}): {err}"))
            })?;
        let response = ensure_success(PROVIDER, response, classify_status)?;
        let payload = response_json(PROVIDER, response)?;

        match Self::extract_output(&payload)? {
            EditOutput::Inline(image) => Ok(image),
            EditOutput::Url(url) => self.download_image(&url),
        }
    }
}
