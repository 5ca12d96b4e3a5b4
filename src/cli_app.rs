//! Top-level CLI definition and dispatch.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use dormant_backup::backup::copy::{CopyResult, VerificationStatus};
use dormant_backup::backup::report::{ReportPaths, format_duration_ms, write_reports};
use dormant_backup::backup::runner::{BackupRunner, RUN_STAMP_FORMAT};
use dormant_backup::backup::summary::{RunSummary, TargetRecord, TargetStatus};
use dormant_backup::backup::target::BackupTarget;
use dormant_backup::core::config::{Config, ConfigOverrides};
use dormant_backup::core::errors::DbkError;
use dormant_backup::core::signals::SignalHandler;
use dormant_backup::integrity::compare::{MatchResult, compare, render_comparison_csv};
use dormant_backup::integrity::digest::{DigestSet, HashAlgorithm, digest_local};
use dormant_backup::integrity::manifest::{read_manifest, write_manifest, write_manifest_file};
use dormant_backup::logger::activity::{ActivityEvent, ActivityLoggerConfig, spawn_logger};
use dormant_backup::logger::jsonl::JsonlConfig;
use dormant_backup::scanner::dormancy::EligibilityVerdict;
use dormant_backup::scanner::patterns::ExclusionFilter;

/// Dormant-folder backup: copy subfolders nobody has touched in a while.
#[derive(Debug, Parser)]
#[command(
    name = "dbk",
    author,
    version,
    about = "Back up dormant subfolders with hash-verified copies",
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
    /// Increase verbosity.
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
    /// Copy every dormant subfolder into a new timestamped destination folder.
    Run(RunArgs),
    /// Classify subfolders without copying anything.
    Scan(RunArgs),
    /// Digest a file or directory tree and print or write a manifest.
    Digest(DigestArgs),
    /// Compare two trees or manifests.
    Compare(CompareArgs),
    /// Inspect configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct RunArgs {
    /// Source directory whose subfolders are backup targets.
    #[arg(long, value_name = "DIR")]
    src: Option<PathBuf>,
    /// Destination directory for timestamped run folders.
    #[arg(long, value_name = "DIR")]
    dst: Option<PathBuf>,
    /// Directory for logs and reports.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
    /// Skip hash verification of copies.
    #[arg(long)]
    no_verify: bool,
    /// Delete source subfolders after a successful copy.
    #[arg(long)]
    delete_source: bool,
    /// Exclusion glob (repeatable); replaces the configured patterns.
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,
    /// Minimum age in days of the newest file for a subfolder to qualify.
    #[arg(long, value_name = "DAYS")]
    backup_age_days: Option<u64>,
    /// Number of subfolders copied concurrently.
    #[arg(long, value_name = "N")]
    parallelism: Option<usize>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            source_dir: self.src.clone(),
            destination_dir: self.dst.clone(),
            log_dir: self.log_dir.clone(),
            no_verify: self.no_verify,
            delete_source: self.delete_source,
            exclude: self.exclude.clone(),
            backup_age_days: self.backup_age_days,
            parallelism: self.parallelism,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct DigestArgs {
    /// File or directory to digest.
    #[arg(value_name = "PATH")]
    path: PathBuf,
    /// Write the manifest here instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
    /// Digest algorithm.
    #[arg(long, value_name = "ALG", default_value_t = HashAlgorithm::Md5)]
    algorithm: HashAlgorithm,
    /// Exclusion glob (repeatable).
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,
}

#[derive(Debug, Clone, Args)]
struct CompareArgs {
    /// First directory or manifest file.
    #[arg(value_name = "A")]
    a: PathBuf,
    /// Second directory or manifest file.
    #[arg(value_name = "B")]
    b: PathBuf,
    /// Algorithm for directory sides (defaults to the manifest's, else md5).
    #[arg(long, value_name = "ALG")]
    algorithm: Option<HashAlgorithm>,
    /// Exclusion glob applied to directory sides (repeatable).
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,
    /// Write compare.csv and compare_diff.csv into this directory.
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
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
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Some targets failed, or the compared trees differ.
    #[error("{0}")]
    Partial(String),
    /// The run could not start or was halted part-way.
    #[error("{0}")]
    Aborted(String),
    /// The run stopped early on SIGINT/SIGTERM.
    #[error("{0}")]
    Interrupted(String),
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
            Self::Aborted(_) => 5,
            Self::Interrupted(_) => 130,
        }
    }
}

impl From<DbkError> for CliError {
    fn from(err: DbkError) -> Self {
        match err {
            DbkError::InvalidConfig { .. }
            | DbkError::MissingConfig { .. }
            | DbkError::ConfigParse { .. }
            | DbkError::InvalidPattern { .. }
            | DbkError::ManifestParse { .. } => Self::User(err.to_string()),
            DbkError::SourceUnavailable { .. } | DbkError::DestinationUnavailable { .. } => {
                Self::Aborted(err.to_string())
            }
            DbkError::Serialization { .. } => Self::Internal(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_backup(cli, args),
        Command::Scan(args) => run_scan(cli, args),
        Command::Digest(args) => run_digest(cli, args),
        Command::Compare(args) => run_compare(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli, args: &RunArgs) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_overrides(&args.overrides());
    Ok(config)
}

// ──────────────────── run ────────────────────

fn run_backup(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = load_config(cli, args)?;
    config.validate()?;

    let started_at = Local::now();
    let stamp = started_at.format(RUN_STAMP_FORMAT).to_string();
    let logger_config =
        ActivityLoggerConfig::new(JsonlConfig::for_run(&config.paths.log_dir, &stamp));
    let (logger, logger_join) = spawn_logger(logger_config)?;

    let signals = SignalHandler::install();
    let outcome = BackupRunner::new(config.clone(), Some(logger.clone()))
        .and_then(|runner| runner.run_at(&signals.token(), started_at));

    if let Err(err) = &outcome {
        logger.send(ActivityEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }
    logger.shutdown();
    if logger_join.join().is_err() {
        eprintln!("[DBK-LOGGER] logger thread panicked; activity log may be incomplete");
    }

    let summary = outcome?;
    let reports = match write_reports(&summary, &config.paths.log_dir) {
        Ok(paths) => Some(paths),
        Err(err) => {
            eprintln!("[DBK-REPORT] failed to write run reports: {err}");
            None
        }
    };

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_run_human(&summary, reports.as_ref(), cli.verbose);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "summary": serde_json::to_value(&summary)?,
                "report": reports.as_ref().map(|p| p.text.to_string_lossy().to_string()),
                "summary_file": reports.as_ref().map(|p| p.json.to_string_lossy().to_string()),
            });
            write_json_line(&payload)?;
        }
    }

    run_exit(&summary)
}

/// Exit status of a finished run: halt, then interruption, then target failures.
fn run_exit(summary: &RunSummary) -> Result<(), CliError> {
    if let Some(reason) = &summary.halt_reason {
        return Err(CliError::Aborted(format!("run halted: {reason}")));
    }
    if summary.cancelled {
        return Err(CliError::Interrupted(format!(
            "run interrupted; {} target(s) not started",
            summary.counts.not_started
        )));
    }
    if summary.has_failures() {
        let failed: Vec<&str> = summary
            .targets
            .iter()
            .filter(|record| {
                matches!(
                    record.status(),
                    TargetStatus::Failed | TargetStatus::ScanError
                )
            })
            .map(|record| record.name.as_str())
            .collect();
        return Err(CliError::Partial(format!(
            "{} target(s) failed: {}",
            failed.len(),
            failed.join(", ")
        )));
    }
    Ok(())
}

fn print_run_human(summary: &RunSummary, reports: Option<&ReportPaths>, verbose: bool) {
    println!(
        "{} {} -> {}",
        "Backup run".bold(),
        summary.source_dir.display(),
        summary.run_dir.display()
    );
    for record in &summary.targets {
        let status = record.status();
        if !verbose && status == TargetStatus::NotEligible {
            continue;
        }
        println!("  {} {:<24} {}", status_tag(status), record.name, record_detail(record));
    }

    let counts = &summary.counts;
    println!(
        "Summary: {} succeeded, {} failed, {} not eligible, {} scan errors, {} not started ({} copied in {})",
        counts.succeeded,
        counts.failed,
        counts.not_eligible,
        counts.scan_errors,
        counts.not_started,
        format_bytes(counts.bytes_copied),
        format_duration_ms(summary.duration_ms()),
    );
    if summary.delete_requested {
        println!(
            "Cleanup: {} deleted, {} delete failures",
            counts.deleted, counts.delete_failed
        );
    }
    if let Some(reason) = &summary.halt_reason {
        println!("{} {reason}", "HALTED:".red().bold());
    }
    if summary.cancelled {
        println!("{}", "Interrupted: remaining targets were not started.".yellow());
    }
    if let Some(paths) = reports {
        println!("Report: {}", paths.text.display());
    }
}

fn status_tag(status: TargetStatus) -> String {
    match status {
        TargetStatus::Succeeded => format!("{:<5}", "ok").green().to_string(),
        TargetStatus::Failed => format!("{:<5}", "FAIL").red().bold().to_string(),
        TargetStatus::ScanError => format!("{:<5}", "ERR").red().to_string(),
        TargetStatus::NotStarted => format!("{:<5}", "wait").yellow().to_string(),
        TargetStatus::NotEligible => format!("{:<5}", "skip").dimmed().to_string(),
    }
}

fn record_detail(record: &TargetRecord) -> String {
    if let Some(report) = &record.copy {
        return match &report.result {
            CopyResult::Success => {
                let verified = if report.verification == VerificationStatus::Verified {
                    "verified"
                } else {
                    "not verified"
                };
                format!(
                    "{} files, {}, {verified}",
                    report.files_copied,
                    format_bytes(report.bytes_copied)
                )
            }
            CopyResult::VerificationMismatch(detail) => {
                format!("verification mismatch ({} paths)", detail.total())
            }
            CopyResult::IoFailure { path, cause } => format!("I/O failure at {path}: {cause}"),
        };
    }
    verdict_detail(&record.verdict)
}

fn verdict_detail(verdict: &EligibilityVerdict) -> String {
    match verdict {
        EligibilityVerdict::Eligible => "eligible".to_string(),
        EligibilityVerdict::TooRecent {
            cause: Some(cause), ..
        } => format!("scan failed: {cause}"),
        EligibilityVerdict::TooRecent {
            newest_modified: Some(newest),
            ..
        } => format!("too recent (newest {})", format_timestamp(*newest)),
        EligibilityVerdict::TooRecent { .. } => "too recent".to_string(),
        EligibilityVerdict::Empty => "empty".to_string(),
        EligibilityVerdict::ExcludedByPattern => "excluded by pattern".to_string(),
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

// ──────────────────── scan ────────────────────

fn run_scan(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = load_config(cli, args)?;
    let runner = BackupRunner::new(config, None)?;
    let targets = runner.scan()?;

    match output_mode(cli) {
        OutputMode::Human if cli.quiet => {}
        OutputMode::Human => {
            println!(
                "{} {} (age threshold {} days)",
                "Scan".bold(),
                runner.source_dir().display(),
                runner.config().backup.backup_age_days
            );
            for target in &targets {
                let tag = if target.verdict.is_eligible() {
                    format!("{:<5}", "copy").green().to_string()
                } else if target.verdict.is_scan_error() {
                    format!("{:<5}", "ERR").red().to_string()
                } else {
                    format!("{:<5}", "skip").dimmed().to_string()
                };
                println!(
                    "  {tag} {:<24} {} ({} files, {} excluded)",
                    target.name,
                    verdict_detail(&target.verdict),
                    target.files.len(),
                    target.excluded.len()
                );
                if cli.verbose {
                    for path in &target.excluded {
                        match runner.filter().matching_pattern(path) {
                            Some(pattern) => println!("        excluded: {path} ({pattern})"),
                            None => println!("        excluded: {path}"),
                        }
                    }
                }
            }
            let eligible = targets.iter().filter(|t| t.verdict.is_eligible()).count();
            println!("{eligible} of {} subfolders eligible", targets.len());
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "source_dir": runner.source_dir().to_string_lossy(),
                "targets": targets.iter().map(target_json).collect::<Vec<_>>(),
            });
            write_json_line(&payload)?;
        }
    }

    if targets.iter().any(|t| t.verdict.is_scan_error()) {
        return Err(CliError::Partial("some subfolders could not be scanned".to_string()));
    }
    Ok(())
}

fn target_json(target: &BackupTarget) -> Value {
    json!({
        "name": target.name,
        "source_path": target.source_path.to_string_lossy(),
        "verdict": target.verdict,
        "label": target.verdict.label(),
        "files": target.files.len(),
        "excluded": target.excluded,
    })
}

// ──────────────────── digest / compare ────────────────────

fn run_digest(cli: &Cli, args: &DigestArgs) -> Result<(), CliError> {
    let filter = ExclusionFilter::new(&args.exclude)?;
    let set = digest_local(&args.path, &filter, args.algorithm)?;

    if let Some(output) = &args.output {
        write_manifest_file(&set, output)?;
    }

    match output_mode(cli) {
        OutputMode::Human => match &args.output {
            Some(output) => {
                if !cli.quiet {
                    println!(
                        "Wrote {} {} digests to {}",
                        set.len(),
                        set.algorithm(),
                        output.display()
                    );
                }
            }
            None => write_manifest(&set, io::stdout().lock())?,
        },
        OutputMode::Json => {
            let payload = json!({
                "command": "digest",
                "path": args.path.to_string_lossy(),
                "algorithm": set.algorithm().name(),
                "output": args.output.as_ref().map(|p| p.to_string_lossy().to_string()),
                "entries": set.iter().map(|e| json!({"path": e.path, "hash": e.hash})).collect::<Vec<_>>(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

/// One side of a comparison: a directory to digest or a manifest to read.
enum CompareSide {
    Tree(PathBuf),
    Manifest(DigestSet),
}

fn open_side(path: &Path) -> Result<CompareSide, CliError> {
    let meta = fs::metadata(path)
        .map_err(|err| CliError::User(format!("cannot access {}: {err}", path.display())))?;
    if meta.is_dir() {
        Ok(CompareSide::Tree(path.to_path_buf()))
    } else {
        Ok(CompareSide::Manifest(read_manifest(path)?))
    }
}

fn resolve_side(
    side: CompareSide,
    filter: &ExclusionFilter,
    algorithm: HashAlgorithm,
) -> Result<DigestSet, CliError> {
    match side {
        CompareSide::Tree(path) => Ok(digest_local(&path, filter, algorithm)?),
        CompareSide::Manifest(set) => Ok(set),
    }
}

fn run_compare(cli: &Cli, args: &CompareArgs) -> Result<(), CliError> {
    let filter = ExclusionFilter::new(&args.exclude)?;
    let a = open_side(&args.a)?;
    let b = open_side(&args.b)?;

    let manifest_algorithm = [&a, &b].into_iter().find_map(|side| match side {
        CompareSide::Manifest(set) if !set.is_empty() => Some(set.algorithm()),
        _ => None,
    });
    let algorithm = args
        .algorithm
        .or(manifest_algorithm)
        .unwrap_or_default();

    let a = resolve_side(a, &filter, algorithm)?;
    let b = resolve_side(b, &filter, algorithm)?;
    if !a.is_empty() && !b.is_empty() && a.algorithm() != b.algorithm() {
        return Err(CliError::User(format!(
            "cannot compare {} digests with {} digests",
            a.algorithm(),
            b.algorithm()
        )));
    }

    let result = compare(&a, &b);
    let tables = args
        .output
        .as_deref()
        .map(|dir| write_compare_tables(&a, &b, dir))
        .transpose()?;
    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_compare_human(&result, a.len(), &args.a, &args.b);
                if let Some([full, diff]) = &tables {
                    println!("Tables: {} {}", full.display(), diff.display());
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "compare",
                "a": args.a.to_string_lossy(),
                "b": args.b.to_string_lossy(),
                "algorithm": algorithm.name(),
                "comparison": serde_json::to_value(&result)?,
                "tables": tables.as_ref().map(|paths| {
                    paths.iter().map(|p| p.to_string_lossy().to_string()).collect::<Vec<_>>()
                }),
            });
            write_json_line(&payload)?;
        }
    }

    match result {
        MatchResult::Match => Ok(()),
        MatchResult::Mismatch(detail) => Err(CliError::Partial(format!(
            "{} path(s) differ",
            detail.total()
        ))),
    }
}

/// Write the full and the differences-only comparison tables into `dir`.
fn write_compare_tables(a: &DigestSet, b: &DigestSet, dir: &Path) -> Result<[PathBuf; 2], CliError> {
    fs::create_dir_all(dir)?;
    let full = dir.join("compare.csv");
    let diff = dir.join("compare_diff.csv");
    fs::write(&full, render_comparison_csv(a, b, false))?;
    fs::write(&diff, render_comparison_csv(a, b, true))?;
    Ok([full, diff])
}

fn print_compare_human(result: &MatchResult, entries: usize, a: &Path, b: &Path) {
    match result {
        MatchResult::Match => println!("{} ({entries} entries)", "MATCH".green().bold()),
        MatchResult::Mismatch(detail) => {
            println!("{} ({} paths)", "MISMATCH".red().bold(), detail.total());
            for path in &detail.missing_from_b {
                println!("  only in {}: {path}", a.display());
            }
            for path in &detail.missing_from_a {
                println!("  only in {}: {path}", b.display());
            }
            for path in &detail.differing {
                println!("  differs: {path}");
            }
        }
    }
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
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
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
        Some(ConfigCommand::Validate) => {
            match Config::load(cli.config.as_deref()).and_then(|config| {
                config.validate()?;
                Ok(config)
            }) {
                Ok(config) => {
                    let hash = config.stable_hash()?;
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
                        OutputMode::Human => {
                            eprintln!("Configuration is INVALID: {e}");
                        }
                        OutputMode::Json => {
                            let payload = json!({
                                "command": "config validate",
                                "valid": false,
                                "error": e.to_string(),
                                "code": e.code(),
                            });
                            write_json_line(&payload)?;
                        }
                    }
                    Err(CliError::User(format!("invalid config: {e}")))
                }
            }
        }
    }
}

// ──────────────────── output helpers ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DBK_OUTPUT_FORMAT").ok();
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

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dormant_backup::core::signals::CancelToken;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "dbk",
            "--config",
            "/tmp/dbk.toml",
            "--json",
            "--no-color",
            "-v",
            "scan",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["dbk", "scan", "--json", "--no-color", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["dbk", "run", "--src", "/a", "--dst", "/b", "--no-verify"],
            vec![
                "dbk",
                "run",
                "--exclude",
                "*.tmp",
                "--exclude",
                ".cache",
                "--backup-age-days",
                "7",
                "--parallelism",
                "4",
                "--delete-source",
            ],
            vec!["dbk", "scan", "--src", "/a"],
            vec!["dbk", "digest", "/data", "--output", "out.md5", "--algorithm", "sha256"],
            vec!["dbk", "compare", "/a", "/b", "--exclude", "*.log", "--output", "out"],
            vec!["dbk", "config", "path"],
            vec!["dbk", "config", "show"],
            vec!["dbk", "config", "validate"],
            vec!["dbk", "completions", "bash"],
        ];
        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse {case:?}: {parsed:?}");
        }
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["dbk", "-v", "-q", "scan"]).is_err());
    }

    #[test]
    fn run_flags_map_to_overrides() {
        let cli = Cli::try_parse_from([
            "dbk",
            "run",
            "--src",
            "/a",
            "--exclude",
            "*.tmp",
            "--no-verify",
            "--parallelism",
            "3",
        ])
        .unwrap();
        let Command::Run(args) = &cli.command else {
            panic!("expected run");
        };
        let overrides = args.overrides();
        assert_eq!(overrides.source_dir, Some(PathBuf::from("/a")));
        assert_eq!(overrides.exclude, vec!["*.tmp"]);
        assert!(overrides.no_verify);
        assert!(!overrides.delete_source);
        assert_eq!(overrides.parallelism, Some(3));
    }

    #[test]
    fn output_mode_resolution() {
        assert_eq!(resolve_output_mode(true, None, true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some(" Human "), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Internal(String::new()).exit_code(), 3);
        assert_eq!(CliError::Partial(String::new()).exit_code(), 4);
        assert_eq!(CliError::Aborted(String::new()).exit_code(), 5);
        assert_eq!(CliError::Interrupted(String::new()).exit_code(), 130);
    }

    #[test]
    fn cancelled_run_exits_as_interrupted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("proj")).unwrap();
        fs::write(src.join("proj/a.txt"), b"a").unwrap();
        let mut config = Config::default();
        config.paths.source_dir = Some(src);
        config.paths.destination_dir = Some(tmp.path().join("dst"));
        config.backup.backup_age_days = 0;
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = BackupRunner::new(config, None).unwrap().run(&cancel).unwrap();
        assert!(summary.cancelled);
        assert!(!summary.has_failures());
        let err = run_exit(&summary).unwrap_err();
        assert_eq!(err.exit_code(), 130);
        assert!(err.to_string().contains("1 target(s) not started"), "{err}");
    }

    #[test]
    fn core_errors_map_to_exit_classes() {
        let user: CliError = DbkError::InvalidConfig {
            details: "x".to_string(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);

        let fatal: CliError = DbkError::DestinationUnavailable {
            path: PathBuf::from("/dst"),
            details: "gone".to_string(),
        }
        .into();
        assert_eq!(fatal.exit_code(), 5);
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
