use std::fmt;
use std::sync::Mutex;

use crate::providers::ProviderSlot;

const BUILD_GEMINI_API_KEY: Option<&str> = option_env!("POSELAB_GEMINI_API_KEY");
const BUILD_NANO_BANANA_API_KEY: Option<&str> = option_env!("POSELAB_NANO_BANANA_API_KEY");

/// Picks the first non-blank credential: session override, then the
/// persisted value, then the build-time default.
pub fn resolve_credential(
    session_override: Option<&str>,
    persisted: Option<&str>,
    build_default: Option<&str>,
) -> Option<String> {
    [session_override, persisted, build_default]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// First four characters followed by an ellipsis.
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{prefix}…")
}

fn masked(value: Option<&str>) -> Option<String> {
    value.map(mask_key)
}

/// Credential source injected into a provider client.
#[derive(Default)]
pub struct CredentialResolver {
    session_override: Mutex<Option<String>>,
    persisted: Option<String>,
    build_default: Option<String>,
}

impl CredentialResolver {
    pub fn new(persisted: Option<String>, build_default: Option<String>) -> Self {
        Self {
            session_override: Mutex::new(None),
            persisted,
            build_default,
        }
    }

    /// Resolver for `slot` with the compiled-in default key, if any.
    pub fn for_slot(slot: ProviderSlot, persisted: Option<String>) -> Self {
        let build_default = match slot {
            ProviderSlot::Primary => BUILD_GEMINI_API_KEY,
            ProviderSlot::Fallback => BUILD_NANO_BANANA_API_KEY,
        };
        Self::new(persisted, build_default.map(str::to_string))
    }

    pub fn set_session_override(&self, value: Option<String>) {
        if let Ok(mut guard) = self.session_override.lock() {
            *guard = value;
        }
    }

    pub fn resolve(&self) -> Option<String> {
        let session = self
            .session_override
            .lock()
            .ok()
            .and_then(|guard| guard.clone());
        resolve_credential(
            session.as_deref(),
            self.persisted.as_deref(),
            self.build_default.as_deref(),
        )
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self
            .session_override
            .lock()
            .ok()
            .and_then(|guard| masked(guard.as_deref()));
        f.debug_struct("CredentialResolver")
            .field("session_override", &session)
            .field("persisted", &masked(self.persisted.as_deref()))
            .field("build_default", &masked(self.build_default.as_deref()))
            .finish()
    }
}
