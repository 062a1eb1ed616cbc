//! Character variation engine: provider clients, source-image intake and
//! the nine-theme generation orchestrator.

pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod source;

pub use error::GenerationError;
pub use orchestrator::{BatchReport, Orchestrator, Progress, SessionCredentials, ThemeOutcome};
pub use providers::{
    GeminiProvider, GenerateRequest, ImageProvider, NanoBananaProvider, ProviderImage,
};
pub use source::SourceImage;
