use thiserror::Error;

/// Failure taxonomy for one provider call or for a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("{provider} API key is not set")]
    MissingCredential { provider: String },
    #[error("{provider} rate limit exceeded (429)")]
    RateLimited { provider: String },
    #[error("{provider} request failed ({status}): {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("{provider} returned no image")]
    NoImageProduced { provider: String },
    #[error("{provider} transport failure: {message}")]
    Transport { provider: String, message: String },
    #[error("invalid source image: {0}")]
    InvalidInput(String),
    #[error("theme pool returned no themes")]
    NoThemes,
}

impl GenerationError {
    pub fn missing_credential(provider: &str) -> Self {
        Self::MissingCredential {
            provider: provider.to_string(),
        }
    }

    pub fn rate_limited(provider: &str) -> Self {
        Self::RateLimited {
            provider: provider.to_string(),
        }
    }

    pub fn no_image(provider: &str) -> Self {
        Self::NoImageProduced {
            provider: provider.to_string(),
        }
    }

    pub fn transport(provider: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Stable snake_case tag used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential { .. } => "missing_credential",
            Self::RateLimited { .. } => "rate_limited",
            Self::ProviderError { .. } => "provider_error",
            Self::NoImageProduced { .. } => "no_image_produced",
            Self::Transport { .. } => "transport",
            Self::InvalidInput(_) => "invalid_input",
            Self::NoThemes => "no_themes",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GenerationError;

    #[test]
    fn display_includes_provider_and_status() {
        let err = GenerationError::ProviderError {
            provider: "gemini".to_string(),
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "gemini request failed (500): boom");
        assert_eq!(err.kind(), "provider_error");
    }

    #[test]
    fn only_rate_limit_reports_rate_limited() {
        assert!(GenerationError::rate_limited("gemini").is_rate_limited());
        assert!(!GenerationError::no_image("gemini").is_rate_limited());
        assert!(!GenerationError::missing_credential("gemini").is_rate_limited());
    }
}
