use std::sync::Arc;
use std::thread;
use std::time::Duration;

use poselab_contracts::credentials::CredentialResolver;
use poselab_contracts::events::{BatchEvent, EventWriter};
use poselab_contracts::images::GeneratedImage;
use poselab_contracts::providers::ProviderSlot;
use poselab_contracts::themes::{Theme, ThemePool, BATCH_SIZE};
use uuid::Uuid;

use crate::error::GenerationError;
use crate::providers::{
    GeminiProvider, GenerateRequest, ImageProvider, NanoBananaProvider, ProviderImage,
};
use crate::source::SourceImage;

/// Fixed pause between consecutive theme requests.
pub const PACING_INTERVAL: Duration = Duration::from_secs(1);
pub const DONE_LABEL: &str = "done";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct ThemeOutcome {
    pub theme: Theme,
    pub provider: ProviderSlot,
    pub result: Result<GeneratedImage, GenerationError>,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: String,
    pub outcomes: Vec<ThemeOutcome>,
    pub active_provider: ProviderSlot,
}

impl BatchReport {
    pub fn images(&self) -> impl Iterator<Item = &GeneratedImage> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Theme, ProviderSlot, &GenerationError)> {
        self.outcomes.iter().filter_map(|outcome| {
            outcome
                .result
                .as_ref()
                .err()
                .map(|err| (&outcome.theme, outcome.provider, err))
        })
    }

    /// Successful images in draw order; failed themes leave no gap.
    pub fn into_images(self) -> Vec<GeneratedImage> {
        self.outcomes
            .into_iter()
            .filter_map(|outcome| outcome.result.ok())
            .collect()
    }
}

/// Resolvers whose session overrides the orchestrator fills before a batch.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub primary: Arc<CredentialResolver>,
    pub fallback: Arc<CredentialResolver>,
}

type Sleeper = Box<dyn FnMut(Duration) + Send>;

/// Runs one batch at a time against a primary provider, downgrading to the
/// fallback for the rest of the session once the primary is rate-limited.
pub struct Orchestrator {
    primary: Box<dyn ImageProvider>,
    fallback: Box<dyn ImageProvider>,
    themes: ThemePool,
    active: ProviderSlot,
    credentials: Option<SessionCredentials>,
    events: Option<EventWriter>,
    sleeper: Sleeper,
}

impl Orchestrator {
    pub fn new(
        primary: Box<dyn ImageProvider>,
        fallback: Box<dyn ImageProvider>,
        themes: ThemePool,
    ) -> Self {
        Self {
            primary,
            fallback,
            themes,
            active: ProviderSlot::Primary,
            credentials: None,
            events: None,
            sleeper: Box::new(thread::sleep),
        }
    }

    /// Gemini as primary and Nano Banana as fallback.
    pub fn with_default_providers(credentials: SessionCredentials, themes: ThemePool) -> Self {
        let mut orchestrator = Self::new(
            Box::new(GeminiProvider::new(credentials.primary.clone())),
            Box::new(NanoBananaProvider::new(credentials.fallback.clone())),
            themes,
        );
        orchestrator.credentials = Some(credentials);
        orchestrator
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    /// Replaces the pacing sleep. The interval itself stays fixed.
    pub fn with_sleeper(mut self, sleeper: impl FnMut(Duration) + Send + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn active_provider(&self) -> ProviderSlot {
        self.active
    }

    /// Back to the primary provider. Call whenever a new source image begins.
    pub fn reset(&mut self) {
        self.active = ProviderSlot::Primary;
    }

    pub fn set_session_credentials(&self, primary: Option<String>, fallback: Option<String>) {
        if let Some(credentials) = &self.credentials {
            credentials.primary.set_session_override(primary);
            credentials.fallback.set_session_override(fallback);
        }
    }

    pub fn generate_batch<F>(
        &mut self,
        source: &SourceImage,
        extra_prompt: &str,
        on_progress: F,
    ) -> Result<Vec<GeneratedImage>, GenerationError>
    where
        F: FnMut(&Progress),
    {
        Ok(self
            .run_batch(source, extra_prompt, on_progress)?
            .into_images())
    }

    pub fn run_batch<F>(
        &mut self,
        source: &SourceImage,
        extra_prompt: &str,
        on_progress: F,
    ) -> Result<BatchReport, GenerationError>
    where
        F: FnMut(&Progress),
    {
        let image_base64 = source.to_base64();
        let themes = self.themes.sample(BATCH_SIZE);
        self.run_themes(image_base64, themes, extra_prompt, on_progress)
    }

    /// Same as [`Orchestrator::run_batch`], skipping themes already used by
    /// an earlier batch.
    pub fn run_batch_excluding<F>(
        &mut self,
        source: &SourceImage,
        extra_prompt: &str,
        used_labels: &[String],
        on_progress: F,
    ) -> Result<BatchReport, GenerationError>
    where
        F: FnMut(&Progress),
    {
        let image_base64 = source.to_base64();
        let themes = self.themes.sample_excluding(used_labels, BATCH_SIZE);
        self.run_themes(image_base64, themes, extra_prompt, on_progress)
    }

    fn run_themes<F>(
        &mut self,
        image_base64: String,
        themes: Vec<Theme>,
        extra_prompt: &str,
        mut on_progress: F,
    ) -> Result<BatchReport, GenerationError>
    where
        F: FnMut(&Progress),
    {
        if themes.is_empty() {
            return Err(GenerationError::NoThemes);
        }
        let batch_id = self
            .events
            .as_ref()
            .map(|events| events.batch_id().to_string())
            .unwrap_or_else(|| format!("batch-{}", Uuid::new_v4()));
        let total = themes.len();
        self.emit(BatchEvent::BatchStarted {
            total,
            extra_prompt: extra_prompt.to_string(),
            active_provider: self.active,
        });

        let mut outcomes = Vec::with_capacity(total);
        for (index, theme) in themes.into_iter().enumerate() {
            on_progress(&Progress {
                completed: index,
                total,
                label: theme.label.clone(),
            });
            self.emit(BatchEvent::ThemeStarted {
                index,
                label: theme.label.clone(),
                provider: self.active,
            });

            let request = GenerateRequest {
                image_base64: image_base64.clone(),
                theme,
                extra_prompt: extra_prompt.to_string(),
            };
            let (provider, result) = self.attempt(&request);
            let result = result.map(|image| {
                GeneratedImage::new(image.bytes, image.mime_type, &request.theme, provider)
            });
            self.emit(match &result {
                Ok(image) => BatchEvent::ImageGenerated {
                    index,
                    id: image.id.clone(),
                    label: image.label.clone(),
                    provider,
                    bytes: image.bytes.len(),
                },
                Err(err) => BatchEvent::ThemeFailed {
                    index,
                    label: request.theme.label.clone(),
                    provider,
                    kind: err.kind().to_string(),
                    error: err.to_string(),
                },
            });
            outcomes.push(ThemeOutcome {
                theme: request.theme,
                provider,
                result,
            });

            if index + 1 < total {
                (self.sleeper)(PACING_INTERVAL);
            }
        }

        on_progress(&Progress {
            completed: total,
            total,
            label: DONE_LABEL.to_string(),
        });
        let generated = outcomes
            .iter()
            .filter(|outcome| outcome.result.is_ok())
            .count();
        self.emit(BatchEvent::BatchFinished {
            generated,
            failed: total - generated,
            active_provider: self.active,
        });

        Ok(BatchReport {
            batch_id,
            outcomes,
            active_provider: self.active,
        })
    }

    /// One fair attempt per theme: a rate-limited primary call is retried
    /// once on the fallback, every other failure is final.
    fn attempt(
        &mut self,
        request: &GenerateRequest,
    ) -> (ProviderSlot, Result<ProviderImage, GenerationError>) {
        if self.active == ProviderSlot::Primary {
            match self.primary.generate(request) {
                Err(err) if err.is_rate_limited() => {
                    self.active = ProviderSlot::Fallback;
                    self.emit(BatchEvent::ProviderDowngraded {
                        from: self.primary.name().to_string(),
                        to: self.fallback.name().to_string(),
                        label: request.theme.label.clone(),
                    });
                }
                other => return (ProviderSlot::Primary, other),
            }
        }
        (ProviderSlot::Fallback, self.fallback.generate(request))
    }

    fn emit(&self, event: BatchEvent) {
        let Some(events) = &self.events else {
            return;
        };
        // A broken event log never aborts a batch.
        let _ = events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use poselab_contracts::credentials::CredentialResolver;
    use poselab_contracts::events::{BatchEvent, EventWriter};
    use poselab_contracts::providers::ProviderSlot;
    use poselab_contracts::themes::{Theme, ThemePool, BATCH_SIZE};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{Orchestrator, Progress, SessionCredentials, DONE_LABEL, PACING_INTERVAL};
    use crate::error::GenerationError;
    use crate::providers::{GenerateRequest, ImageProvider, ProviderImage};
    use crate::source::SourceImage;

    const SEED: u64 = 11;

    type Script = fn(usize) -> Result<ProviderImage, GenerationError>;

    struct ScriptedProvider {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        script: Script,
    }

    impl ScriptedProvider {
        fn boxed(name: &'static str, script: Script) -> (Box<dyn ImageProvider>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                name,
                calls: calls.clone(),
                script,
            };
            (Box::new(provider), calls)
        }
    }

    impl ImageProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn generate(&self, _request: &GenerateRequest) -> Result<ProviderImage, GenerationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.script)(call)
        }
    }

    fn ok_image(call: usize) -> Result<ProviderImage, GenerationError> {
        Ok(ProviderImage {
            bytes: vec![call as u8],
            mime_type: Some("image/png".to_string()),
        })
    }

    fn always_rate_limited(_: usize) -> Result<ProviderImage, GenerationError> {
        Err(GenerationError::rate_limited("primary"))
    }

    fn first_four_then_error(call: usize) -> Result<ProviderImage, GenerationError> {
        if call < 4 {
            return ok_image(call);
        }
        Err(GenerationError::ProviderError {
            provider: "primary".to_string(),
            status: 500,
            message: "internal".to_string(),
        })
    }

    fn always_missing_primary(_: usize) -> Result<ProviderImage, GenerationError> {
        Err(GenerationError::missing_credential("primary"))
    }

    fn always_missing_fallback(_: usize) -> Result<ProviderImage, GenerationError> {
        Err(GenerationError::missing_credential("fallback"))
    }

    fn always_no_image(_: usize) -> Result<ProviderImage, GenerationError> {
        Err(GenerationError::no_image("primary"))
    }

    fn source() -> SourceImage {
        SourceImage::from_bytes(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec(), "image/png")
            .unwrap_or_else(|err| panic!("fixture source rejected: {err}"))
    }

    fn orchestrator(
        primary: Box<dyn ImageProvider>,
        fallback: Box<dyn ImageProvider>,
    ) -> Orchestrator {
        Orchestrator::new(primary, fallback, ThemePool::seeded(SEED)).with_sleeper(|_| {})
    }

    #[test]
    fn rate_limit_downgrades_and_retries_same_theme_on_fallback() -> anyhow::Result<()> {
        let (primary, primary_calls) = ScriptedProvider::boxed("primary", always_rate_limited);
        let (fallback, fallback_calls) = ScriptedProvider::boxed("fallback", ok_image);
        let mut orchestrator = orchestrator(primary, fallback);

        let images = orchestrator.generate_batch(&source(), "", |_| {})?;

        assert_eq!(images.len(), BATCH_SIZE);
        assert!(images
            .iter()
            .all(|image| image.provider == ProviderSlot::Fallback));
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), BATCH_SIZE);
        assert_eq!(orchestrator.active_provider(), ProviderSlot::Fallback);

        orchestrator.reset();
        assert_eq!(orchestrator.active_provider(), ProviderSlot::Primary);
        Ok(())
    }

    #[test]
    fn downgrade_persists_into_the_next_batch_until_reset() -> anyhow::Result<()> {
        let (primary, primary_calls) = ScriptedProvider::boxed("primary", always_rate_limited);
        let (fallback, _) = ScriptedProvider::boxed("fallback", ok_image);
        let mut orchestrator = orchestrator(primary, fallback);

        orchestrator.generate_batch(&source(), "", |_| {})?;
        orchestrator.generate_batch(&source(), "", |_| {})?;
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);

        orchestrator.reset();
        orchestrator.generate_batch(&source(), "", |_| {})?;
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn provider_errors_are_skipped_in_draw_order() -> anyhow::Result<()> {
        let (primary, _) = ScriptedProvider::boxed("primary", first_four_then_error);
        let (fallback, fallback_calls) = ScriptedProvider::boxed("fallback", ok_image);
        let mut orchestrator = orchestrator(primary, fallback);
        let drawn = ThemePool::seeded(SEED).sample(BATCH_SIZE);

        let mut progress: Vec<Progress> = Vec::new();
        let images = orchestrator.generate_batch(&source(), "", |p| progress.push(p.clone()))?;

        assert_eq!(images.len(), 4);
        let labels: Vec<&str> = images.iter().map(|image| image.label.as_str()).collect();
        let expected: Vec<&str> = drawn[..4].iter().map(|theme| theme.label.as_str()).collect();
        assert_eq!(labels, expected);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.active_provider(), ProviderSlot::Primary);

        assert_eq!(progress.len(), BATCH_SIZE + 1);
        for (idx, step) in progress.iter().enumerate() {
            assert_eq!(step.completed, idx);
            assert_eq!(step.total, BATCH_SIZE);
        }
        assert_eq!(progress[0].label, drawn[0].label);
        assert_eq!(progress[BATCH_SIZE].label, DONE_LABEL);
        Ok(())
    }

    #[test]
    fn missing_credentials_everywhere_yield_empty_batch() -> anyhow::Result<()> {
        let (primary, _) = ScriptedProvider::boxed("primary", always_missing_primary);
        let (fallback, _) = ScriptedProvider::boxed("fallback", always_missing_fallback);
        let mut orchestrator = orchestrator(primary, fallback);

        let report = orchestrator.run_batch(&source(), "", |_| {})?;
        assert_eq!(report.failures().count(), BATCH_SIZE);
        assert!(report.into_images().is_empty());
        Ok(())
    }

    #[test]
    fn non_rate_limit_failures_do_not_downgrade() -> anyhow::Result<()> {
        let (primary, _) = ScriptedProvider::boxed("primary", always_no_image);
        let (fallback, fallback_calls) = ScriptedProvider::boxed("fallback", ok_image);
        let mut orchestrator = orchestrator(primary, fallback);

        let images = orchestrator.generate_batch(&source(), "", |_| {})?;
        assert!(images.is_empty());
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.active_provider(), ProviderSlot::Primary);
        Ok(())
    }

    #[test]
    fn fallback_failure_after_downgrade_is_a_skip() -> anyhow::Result<()> {
        let (primary, _) = ScriptedProvider::boxed("primary", always_rate_limited);
        let (fallback, _) = ScriptedProvider::boxed("fallback", always_missing_fallback);
        let mut orchestrator = orchestrator(primary, fallback);

        let report = orchestrator.run_batch(&source(), "", |_| {})?;
        assert_eq!(report.active_provider, ProviderSlot::Fallback);
        assert!(report
            .failures()
            .all(|(_, slot, err)| slot == ProviderSlot::Fallback
                && matches!(err, GenerationError::MissingCredential { .. })));
        Ok(())
    }

    #[test]
    fn pacing_sleeps_between_themes_only() -> anyhow::Result<()> {
        let (primary, _) = ScriptedProvider::boxed("primary", ok_image);
        let (fallback, _) = ScriptedProvider::boxed("fallback", ok_image);
        let pauses: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = pauses.clone();
        let mut orchestrator = Orchestrator::new(primary, fallback, ThemePool::seeded(SEED))
            .with_sleeper(move |pause| {
                if let Ok(mut guard) = recorded.lock() {
                    guard.push(pause);
                }
            });

        orchestrator.generate_batch(&source(), "", |_| {})?;
        let pauses = pauses.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(pauses.len(), BATCH_SIZE - 1);
        assert!(pauses.iter().all(|pause| *pause == PACING_INTERVAL));
        Ok(())
    }

    #[test]
    fn reset_is_idempotent() {
        let (primary, _) = ScriptedProvider::boxed("primary", ok_image);
        let (fallback, _) = ScriptedProvider::boxed("fallback", ok_image);
        let mut orchestrator = orchestrator(primary, fallback);
        orchestrator.reset();
        orchestrator.reset();
        assert_eq!(orchestrator.active_provider(), ProviderSlot::Primary);
    }

    #[test]
    fn empty_pool_fails_the_batch() {
        let (primary, _) = ScriptedProvider::boxed("primary", ok_image);
        let (fallback, _) = ScriptedProvider::boxed("fallback", ok_image);
        let mut orchestrator = Orchestrator::new(
            primary,
            fallback,
            ThemePool::with_catalog(Vec::new(), StdRng::seed_from_u64(1)),
        );
        let err = orchestrator.generate_batch(&source(), "", |_| {}).err();
        assert_eq!(err, Some(GenerationError::NoThemes));
    }

    #[test]
    fn small_catalog_reports_its_own_total() -> anyhow::Result<()> {
        let (primary, _) = ScriptedProvider::boxed("primary", ok_image);
        let (fallback, _) = ScriptedProvider::boxed("fallback", ok_image);
        let pool = ThemePool::with_catalog(
            vec![Theme::new("a", "one"), Theme::new("b", "two")],
            StdRng::seed_from_u64(1),
        );
        let mut orchestrator = Orchestrator::new(primary, fallback, pool).with_sleeper(|_| {});

        let mut totals = Vec::new();
        let images = orchestrator.generate_batch(&source(), "", |p| totals.push(p.total))?;
        assert_eq!(images.len(), 2);
        assert_eq!(totals, vec![2, 2, 2]);
        Ok(())
    }

    #[test]
    fn excluding_batch_avoids_used_labels() -> anyhow::Result<()> {
        let (primary, _) = ScriptedProvider::boxed("primary", ok_image);
        let (fallback, _) = ScriptedProvider::boxed("fallback", ok_image);
        let mut orchestrator = orchestrator(primary, fallback);
        let used: Vec<String> = ThemePool::seeded(5)
            .sample(20)
            .into_iter()
            .map(|theme| theme.label)
            .collect();

        let report = orchestrator.run_batch_excluding(&source(), "", &used, |_| {})?;
        assert_eq!(report.outcomes.len(), BATCH_SIZE);
        assert!(report
            .images()
            .all(|image| !used.contains(&image.label)));
        Ok(())
    }

    #[test]
    fn events_record_downgrade_and_outcomes_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "batch-test");
        let (primary, _) = ScriptedProvider::boxed("primary", always_rate_limited);
        let (fallback, _) = ScriptedProvider::boxed("fallback", |call| {
            if call == 0 {
                Err(GenerationError::no_image("fallback"))
            } else {
                ok_image(call)
            }
        });
        let mut orchestrator = orchestrator(primary, fallback).with_events(events.clone());

        let report = orchestrator.run_batch(&source(), "", |_| {})?;
        assert_eq!(report.batch_id, "batch-test");

        let types = events.read_kinds()?;
        assert_eq!(types.first().copied(), Some("batch_started"));
        assert_eq!(types.last().copied(), Some("batch_finished"));
        let expected_head = [
            "batch_started",
            "theme_started",
            "provider_downgraded",
            "theme_failed",
            "theme_started",
            "image_generated",
        ];
        assert_eq!(&types[..expected_head.len()], &expected_head);
        assert_eq!(
            types.iter().filter(|t| **t == "provider_downgraded").count(),
            1
        );
        assert_eq!(
            types.iter().filter(|t| **t == "image_generated").count(),
            BATCH_SIZE - 1
        );

        let records = events.read_events()?;
        assert!(records.iter().all(|record| record.batch_id == "batch-test"));
        assert_eq!(
            records[2].event,
            BatchEvent::ProviderDowngraded {
                from: "primary".to_string(),
                to: "fallback".to_string(),
                label: report.outcomes[0].theme.label.clone(),
            }
        );
        match &records[3].event {
            BatchEvent::ThemeFailed {
                index,
                provider,
                kind,
                ..
            } => {
                assert_eq!(*index, 0);
                assert_eq!(*provider, ProviderSlot::Fallback);
                assert_eq!(kind, GenerationError::no_image("fallback").kind());
            }
            other => panic!("expected theme_failed, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn session_credentials_fill_resolver_overrides() {
        let credentials = SessionCredentials {
            primary: Arc::new(CredentialResolver::new(Some("stored".to_string()), None)),
            fallback: Arc::new(CredentialResolver::new(None, None)),
        };
        let orchestrator =
            Orchestrator::with_default_providers(credentials.clone(), ThemePool::seeded(SEED));

        orchestrator.set_session_credentials(Some("session".to_string()), Some("nb".to_string()));
        assert_eq!(credentials.primary.resolve().as_deref(), Some("session"));
        assert_eq!(credentials.fallback.resolve().as_deref(), Some("nb"));

        orchestrator.set_session_credentials(None, None);
        assert_eq!(credentials.primary.resolve().as_deref(), Some("stored"));
        assert_eq!(credentials.fallback.resolve(), None);
    }
}
