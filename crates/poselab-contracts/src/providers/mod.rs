use std::fmt;

use serde::{Deserialize, Serialize};

/// Which provider a batch is currently routed to.
///
/// A session starts on `Primary`. The only transitions are a downgrade to
/// `Fallback` on rate-limit and an explicit reset back to `Primary`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSlot {
    #[default]
    Primary,
    Fallback,
}

impl ProviderSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ProviderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
