//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use signal_hook::consts::{SIGINT, SIGTERM};
use thiserror::Error;

use backup_recovery::acquisition::{
    ArtifactSource, DirectorySource, FileSource, ManifestSource, StagedSource,
};
use backup_recovery::core::config::Config;
use backup_recovery::logger::events::{
    CHANNEL_CAPACITY, EventLoggerHandle, EventSink, ScanEvent, spawn_event_logger,
};
use backup_recovery::logger::jsonl::JsonlConfig;
use backup_recovery::recovery::engine::{CancelToken, RecoveryEngine};
use backup_recovery::recovery::record::{Confidence, IssueStage, ScanResult};

const TEXT_PREVIEW_CHARS: usize = 120;

/// brec: recover deleted artifacts from mobile backup databases.
#[derive(Debug, Parser)]
#[command(
    name = "brec",
    author,
    version,
    about = "Backup Recovery - deleted artifact recovery for mobile backup databases",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Print per-type progress to stderr.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan a source for deleted artifacts.
    Scan(ScanArgs),
    /// List the artifact types brec knows how to recover.
    Catalog,
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["source_dir", "file"])
))]
struct ScanArgs {
    /// Backup root: a standard backup with `Manifest.db`, or an extracted tree.
    #[arg(long, value_name = "DIR")]
    source_dir: Option<PathBuf>,
    /// Single database file scanned for every requested type.
    #[arg(long, value_name = "DB")]
    file: Option<PathBuf>,
    /// Artifact type to scan (repeatable). Defaults to every catalog type.
    #[arg(long = "type", value_name = "NAME")]
    types: Vec<String>,
    /// Fixed classifier seed for reproducible scoring.
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,
    /// Skip classifier training; keep the first carved candidates unfiltered.
    #[arg(long)]
    no_classifier: bool,
    /// Override the JSONL event log path.
    #[arg(long, value_name = "PATH")]
    event_log: Option<PathBuf>,
    /// Copy each acquired database here before scanning it.
    #[arg(long, value_name = "DIR")]
    stage_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path in use.
    Path,
    /// Print the effective configuration.
    Show,
    /// Check the configuration and print its hash.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Catalog => run_catalog(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── scan ────────────────────

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let mut config =
        Config::load(cli.config.as_deref()).map_err(|e| CliError::User(e.to_string()))?;
    if let Some(seed) = args.seed {
        config.classifier.seed = Some(seed);
    }
    if args.no_classifier {
        config.classifier.enabled = false;
    }
    if let Some(path) = &args.event_log {
        config.paths.event_log.clone_from(path);
    }

    let source = build_source(args)?;
    let logger = spawn_event_logger(JsonlConfig::at(&config.paths.event_log), CHANNEL_CAPACITY)
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();
    sinks.push(Arc::new(logger.clone()));
    if cli.verbose {
        sinks.push(Arc::new(StderrProgress));
    }

    let cancel = CancelToken::new();
    register_cancel_signals(&cancel);

    let engine = RecoveryEngine::from_config(config)
        .map_err(|e| CliError::User(e.to_string()))?
        .with_events(Arc::new(FanoutSink(sinks)))
        .with_cancel_token(cancel.clone());

    let types = if args.types.is_empty() {
        engine.catalog().names()
    } else {
        args.types.clone()
    };
    let result = engine.scan(&types, source.as_ref());
    logger.shutdown();
    report_dropped_events(&logger);

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_scan_report(&source.describe(), &result);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "source": source.describe(),
                "artifacts": serde_json::to_value(&result)?,
            });
            write_json_line(&payload)?;
        }
    }

    if cancel.is_cancelled() {
        let skipped = result
            .artifacts
            .values()
            .filter(|a| a.issues.iter().any(|i| i.stage == IssueStage::Cancelled))
            .count();
        return Err(CliError::Partial(format!(
            "scan cancelled; {skipped} artifact type(s) not started"
        )));
    }
    Ok(())
}

fn build_source(args: &ScanArgs) -> Result<Box<dyn ArtifactSource>, CliError> {
    let inner: Box<dyn ArtifactSource> = match (&args.source_dir, &args.file) {
        (Some(dir), None) if ManifestSource::is_backup_root(dir) => Box::new(
            ManifestSource::new(dir).map_err(|e| CliError::User(e.to_string()))?,
        ),
        (Some(dir), None) => Box::new(
            DirectorySource::new(dir).map_err(|e| CliError::User(e.to_string()))?,
        ),
        (None, Some(file)) => Box::new(FileSource::new(file)),
        _ => {
            return Err(CliError::Internal(
                "exactly one of --source-dir or --file is required".to_string(),
            ));
        }
    };
    match &args.stage_dir {
        Some(stage) => Ok(Box::new(
            StagedSource::new(inner, stage).map_err(|e| CliError::Runtime(e.to_string()))?,
        )),
        None => Ok(inner),
    }
}

fn register_cancel_signals(cancel: &CancelToken) {
    if let Err(e) = signal_hook::flag::register(SIGINT, cancel.flag()) {
        eprintln!("[BREC-SIGNAL] failed to register SIGINT: {e}");
    }
    if let Err(e) = signal_hook::flag::register(SIGTERM, cancel.flag()) {
        eprintln!("[BREC-SIGNAL] failed to register SIGTERM: {e}");
    }
}

fn report_dropped_events(logger: &EventLoggerHandle) {
    let dropped = logger.dropped_events();
    if dropped > 0 {
        eprintln!("[BREC-JSONL] {dropped} event(s) dropped under back-pressure");
    }
}

fn print_scan_report(source: &str, result: &ScanResult) {
    println!("{} {source}", "Source:".bold());
    for (name, recovery) in &result.artifacts {
        println!();
        println!(
            "{} ({} candidate(s))",
            name.bold(),
            recovery.candidates.len()
        );
        if let Some(evidence) = &recovery.evidence {
            println!("  sha256 {}  {} bytes", evidence.sha256, evidence.bytes);
        }
        for candidate in &recovery.candidates {
            let tier = candidate.confidence.label();
            let tier = match candidate.confidence {
                Confidence::High => tier.green(),
                Confidence::Medium { .. } => tier.yellow(),
                Confidence::Low => tier.dimmed(),
            };
            let at = candidate
                .offset
                .map_or_else(String::new, |offset| format!(" @{offset}"));
            println!("  [{tier}]{at} {}", preview(&candidate.text));
        }
        for issue in &recovery.issues {
            println!("  {} {}", "!".yellow(), issue.message);
        }
    }
    println!();
    println!(
        "{} candidate(s) across {} artifact type(s)",
        result.total_candidates(),
        result.len()
    );
}

fn preview(text: &str) -> String {
    if text.chars().count() <= TEXT_PREVIEW_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(TEXT_PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

/// Forwards every event to each inner sink.
struct FanoutSink(Vec<Arc<dyn EventSink>>);

impl EventSink for FanoutSink {
    fn emit(&self, event: ScanEvent) {
        for sink in &self.0 {
            sink.emit(event.clone());
        }
    }
}

/// `--verbose` progress lines on stderr.
struct StderrProgress;

impl EventSink for StderrProgress {
    fn emit(&self, event: ScanEvent) {
        let line = match event {
            ScanEvent::ClassifierTrainingStarted { samples, epochs } => {
                format!("training classifier on {samples} samples, {epochs} epochs")
            }
            ScanEvent::ClassifierTrainingCompleted {
                final_loss,
                duration_ms,
            } => format!("classifier ready (loss {final_loss:.4}, {duration_ms} ms)"),
            ScanEvent::ClassifierUnavailable { reason } => {
                format!("classifier unavailable: {reason}")
            }
            ScanEvent::ArtifactScanStarted { artifact } => format!("scanning {artifact}"),
            ScanEvent::ArtifactScanCompleted {
                artifact,
                structured,
                carved,
                duration_ms,
            } => format!("{artifact}: {structured} structured, {carved} carved ({duration_ms} ms)"),
            ScanEvent::ArtifactError {
                artifact, message, ..
            } => format!("{artifact}: {message}"),
            ScanEvent::SessionStarted { .. } | ScanEvent::SessionCompleted { .. } => return,
        };
        eprintln!("[brec] {line}");
    }
}

// ──────────────────── catalog ────────────────────

fn run_catalog(cli: &Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref()).map_err(|e| CliError::User(e.to_string()))?;
    let catalog = config
        .build_catalog()
        .map_err(|e| CliError::User(e.to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => {
            for descriptor in catalog.iter() {
                println!("{}", descriptor.name.bold());
                println!("  path:       {}", descriptor.acquisition_path);
                println!("  table:      {}", descriptor.primary_table);
                println!("  signatures: {}", descriptor.carve_signatures.join(", "));
            }
        }
        OutputMode::Json => {
            let artifacts: Vec<Value> = catalog
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?;
            let payload = json!({
                "command": "catalog",
                "artifacts": artifacts,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())
                .map_err(|e| CliError::Runtime(e.to_string()))?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config
                    .stable_hash()
                    .map_err(|e| CliError::Runtime(e.to_string()))?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("BREC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
