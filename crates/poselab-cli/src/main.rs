use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use poselab_contracts::credentials::CredentialResolver;
use poselab_contracts::events::EventWriter;
use poselab_contracts::keystore::{default_keystore_path, KeyStore};
use poselab_contracts::providers::ProviderSlot;
use poselab_contracts::runs::manifest::{
    file_stamp, image_file_name, now_utc_iso, read_manifest, write_manifest, BatchManifest,
    ManifestFailure, ManifestImage, MANIFEST_FILE_NAME, MANIFEST_SCHEMA_VERSION,
};
use poselab_contracts::themes::{default_catalog, ThemePool};
use poselab_engine::{BatchReport, Orchestrator, Progress, SessionCredentials, SourceImage};

#[derive(Debug, Parser)]
#[command(
    name = "poselab",
    version,
    about = "Generate nine themed variations of a character image"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Themes,
    #[command(subcommand)]
    Keys(KeysCommand),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    gemini_key: Option<String>,
    #[arg(long)]
    nano_banana_key: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    /// Skip themes already recorded in `<out>/batch.json`.
    #[arg(long)]
    avoid_repeats: bool,
}

#[derive(Debug, Subcommand)]
enum KeysCommand {
    Show,
    Set {
        #[arg(long)]
        gemini: Option<String>,
        #[arg(long)]
        nano_banana: Option<String>,
    },
    Clear,
}

const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";
const NANO_BANANA_KEY_ENV: &str = "NANO_BANANA_API_KEY";

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("poselab error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Themes => run_themes(),
        Command::Keys(command) => run_keys(command, &keystore_path()),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let source = SourceImage::load(&args.image)?;
    let store = KeyStore::load(&keystore_path())?;
    let credentials = SessionCredentials {
        primary: Arc::new(CredentialResolver::for_slot(
            ProviderSlot::Primary,
            store.gemini_api_key.clone(),
        )),
        fallback: Arc::new(CredentialResolver::for_slot(
            ProviderSlot::Fallback,
            store.nano_banana_api_key.clone(),
        )),
    };
    let themes = match args.seed {
        Some(seed) => ThemePool::seeded(seed),
        None => ThemePool::new(),
    };

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed creating {}", args.out.display()))?;
    let batch_id = format!("batch-{}", Local::now().format("%Y%m%dT%H%M%S%3f"));
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut orchestrator = Orchestrator::with_default_providers(credentials, themes)
        .with_events(EventWriter::new(&events_path, batch_id));

    orchestrator.reset();
    orchestrator.set_session_credentials(
        session_key(args.gemini_key.as_deref(), GEMINI_KEY_ENV),
        session_key(args.nano_banana_key.as_deref(), NANO_BANANA_KEY_ENV),
    );

    let manifest_path = args.out.join(MANIFEST_FILE_NAME);
    let started_at = now_utc_iso();
    let previous = if args.avoid_repeats {
        read_manifest(&manifest_path)
    } else {
        None
    };
    let report = match &previous {
        Some(previous) => orchestrator.run_batch_excluding(
            &source,
            &args.prompt,
            &previous.used_labels(),
            print_progress,
        )?,
        None => orchestrator.run_batch(&source, &args.prompt, print_progress)?,
    };

    for (theme, provider, err) in report.failures() {
        eprintln!("skipped {} ({provider}): {err}", theme.label);
    }

    let stamp = file_stamp(Local::now());
    let mut manifest = write_batch_outputs(&args.out, &report, &args.prompt, started_at, &stamp)?;
    save_manifest(&manifest_path, &mut manifest, previous.as_ref())?;

    if manifest.images.is_empty() {
        bail!("image generation failed for every theme");
    }
    println!(
        "Saved {} of {} images to {} (provider: {})",
        manifest.images.len(),
        report.outcomes.len(),
        args.out.display(),
        report.active_provider
    );
    Ok(0)
}

fn run_themes() -> Result<i32> {
    for theme in default_catalog() {
        println!("{} — {}", theme.label, theme.description);
    }
    Ok(0)
}

fn run_keys(command: KeysCommand, path: &Path) -> Result<i32> {
    let mut store = KeyStore::load(path)?;
    match command {
        KeysCommand::Show => {}
        KeysCommand::Set {
            gemini,
            nano_banana,
        } => {
            if gemini.is_none() && nano_banana.is_none() {
                bail!("keys set needs --gemini and/or --nano-banana");
            }
            if let Some(value) = gemini {
                store.set(ProviderSlot::Primary, &value);
            }
            if let Some(value) = nano_banana {
                store.set(ProviderSlot::Fallback, &value);
            }
            store.save(path)?;
        }
        KeysCommand::Clear => {
            store.clear();
            store.save(path)?;
        }
    }
    println!("Key store: {}", path.display());
    println!("gemini: {}", store.masked(ProviderSlot::Primary));
    println!("nano_banana: {}", store.masked(ProviderSlot::Fallback));
    Ok(0)
}

fn print_progress(progress: &Progress) {
    println!("{}", progress_line(progress));
}

fn progress_line(progress: &Progress) -> String {
    if progress.completed >= progress.total {
        return format!("[{}/{}] {}", progress.total, progress.total, progress.label);
    }
    format!("[{}/{}] {}", progress.completed + 1, progress.total, progress.label)
}

/// Writes every generated image into `out_dir` and returns the manifest
/// describing them.
fn write_batch_outputs(
    out_dir: &Path,
    report: &BatchReport,
    extra_prompt: &str,
    started_at: String,
    stamp: &str,
) -> Result<BatchManifest> {
    let mut images = Vec::new();
    for (idx, image) in report.images().enumerate() {
        let file = image_file_name(idx, &image.label, stamp, image.extension());
        let path = out_dir.join(&file);
        fs::write(&path, &image.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        images.push(ManifestImage {
            id: image.id.clone(),
            label: image.label.clone(),
            description: image.description.clone(),
            provider: image.provider.as_str().to_string(),
            file,
            created_at: image.created_at.to_rfc3339(),
        });
    }
    let failures = report
        .failures()
        .map(|(theme, provider, err)| ManifestFailure {
            label: theme.label.clone(),
            provider: provider.as_str().to_string(),
            error: err.to_string(),
        })
        .collect();

    Ok(BatchManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        batch_id: report.batch_id.clone(),
        started_at,
        finished_at: now_utc_iso(),
        active_provider: report.active_provider.as_str().to_string(),
        extra_prompt: extra_prompt.to_string(),
        images,
        failures,
        previous_labels: Vec::new(),
    })
}

/// Writes `batch.json`, keeping the label history of the manifest it
/// replaces so repeats stay excluded across any number of runs.
fn save_manifest(
    path: &Path,
    manifest: &mut BatchManifest,
    previous: Option<&BatchManifest>,
) -> Result<()> {
    if let Some(previous) = previous {
        manifest.carry_forward(previous);
    }
    write_manifest(path, manifest)
}

/// A CLI flag wins over the environment variable.
fn session_key(flag: Option<&str>, env_key: &str) -> Option<String> {
    flag.map(str::to_string)
        .or_else(|| non_empty_env(env_key))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn keystore_path() -> PathBuf {
    let home = non_empty_env("POSELAB_HOME")
        .map(PathBuf::from)
        .or_else(|| non_empty_env("HOME").map(|home| PathBuf::from(home).join(".poselab")));
    default_keystore_path(home.as_deref())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
