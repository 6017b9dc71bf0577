//! CLI entry point for the AlgoSelector pipeline.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use algoselector_core::{
    ActionOutcome, ClientConfig, Dashboard, Dataset, ErrorKind, Explanation, MonitoringSnapshot,
    PipelineError, PreprocessingAction, ProfilingReport, Recommendation, ReportFormat, RunResult,
    SessionStore, Stage, StageController, StageStatus,
};
use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use tracing::{debug, info};

const DEFAULT_SESSION_FILE: &str = "algoselector-session.json";
const API_URL_VAR: &str = "ALGOSELECTOR_API_URL";
const SESSION_FILE_VAR: &str = "ALGOSELECTOR_SESSION_FILE";

/// CLI-compatible preprocessing action enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliAction {
    /// Impute or drop missing values
    Missing,
    /// Cap or drop outliers
    Outliers,
    /// Scale numeric columns
    Scaling,
    /// Encode categorical columns
    Encoding,
}

impl From<CliAction> for PreprocessingAction {
    fn from(cli: CliAction) -> Self {
        match cli {
            CliAction::Missing => PreprocessingAction::Missing,
            CliAction::Outliers => PreprocessingAction::Outliers,
            CliAction::Scaling => PreprocessingAction::Scaling,
            CliAction::Encoding => PreprocessingAction::Encoding,
        }
    }
}

/// CLI-compatible report format enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliFormat {
    Pdf,
    Docx,
}

impl From<CliFormat> for ReportFormat {
    fn from(cli: CliFormat) -> Self {
        match cli {
            CliFormat::Pdf => ReportFormat::Pdf,
            CliFormat::Docx => ReportFormat::Docx,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "AlgoSelector AutoML pipeline client",
    long_about = "Drive the AlgoSelector analysis service from the command line.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  ALGOSELECTOR_API_URL        Base URL of the analysis service\n  \
                  ALGOSELECTOR_SESSION_FILE   Where the session is persisted\n\n\
                  EXAMPLES:\n  \
                  algoselector login --email me@example.com --password secret\n  \
                  algoselector upload titanic.csv\n  \
                  algoselector target Survived\n  \
                  algoselector apply missing\n  \
                  algoselector run\n  \
                  algoselector report --format pdf --out reports/"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Base URL of the analysis service
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Session file (credential, dataset id, target column)
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,

    /// Only show errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show debug logs
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the credential
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account
    Register {
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Clear the session
    Logout,
    /// Show the session and which stages can be entered
    Status,
    /// Validate and upload a CSV file
    Upload { file: PathBuf },
    /// Show the profiling report
    Profile,
    /// Choose the target column
    Target { column: String },
    /// Apply a preprocessing action
    Apply {
        #[arg(value_enum)]
        action: CliAction,
    },
    /// Show recommended algorithms
    Recommend,
    /// Run algorithm selection
    Run {
        /// Train every candidate instead of the meta-selected ones
        #[arg(long)]
        no_meta_selection: bool,
    },
    /// Show the last run result
    Results,
    /// Show dataset insights
    Insights,
    /// Explain the last run
    Explain,
    /// Download the analysis report
    Report {
        #[arg(long, value_enum, default_value = "pdf")]
        format: CliFormat,
        /// Directory to save the report in
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Poll system stats and logs
    Monitor {
        /// Number of stats intervals to keep polling after the first read
        #[arg(long, default_value = "0")]
        ticks: u32,
    },
}

/// Initialize the tracing subscriber for logging.
fn init_logging(level: &str, quiet: bool, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        level
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Flags win over the environment, the environment over defaults.
fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut builder = ClientConfig::builder();
    if let Some(url) = args.base_url.clone().or_else(|| env::var(API_URL_VAR).ok()) {
        builder = builder.base_url(url);
    }
    Ok(builder.build()?)
}

fn session_path(args: &Args) -> PathBuf {
    args.session_file
        .clone()
        .or_else(|| env::var(SESSION_FILE_VAR).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.verbose);

    // Load environment variables from .env file
    dotenv().ok();

    let config = build_config(&args)?;
    let path = session_path(&args);
    debug!(session = %path.display(), base_url = %config.base_url, "Starting");
    let dashboard = Dashboard::connect(config, SessionStore::open(path))?;

    run_command(&dashboard, args.command).await
}

async fn run_command(dashboard: &Dashboard, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            dashboard.login(&email, &password).await?;
            println!("Signed in as {}", email.trim());
            Ok(())
        }
        Command::Register {
            full_name,
            email,
            password,
        } => {
            dashboard.register(&full_name, &email, &password).await?;
            println!("Account created. Sign in with `algoselector login`.");
            Ok(())
        }
        Command::Logout => {
            dashboard.logout();
            println!("Signed out");
            Ok(())
        }
        Command::Status => {
            print_status(dashboard);
            Ok(())
        }
        Command::Upload { file } => {
            let status = dashboard.upload().upload(&file).await;
            render(status, print_dataset)
        }
        Command::Profile => render(dashboard.preprocessing().enter().await, print_profile),
        Command::Target { column } => {
            let status = dashboard.preprocessing().select_target(&column).await;
            if status.is_ready() {
                println!("Target column set to '{}'", column);
            }
            render(status, print_profile)
        }
        Command::Apply { action } => apply(dashboard, action.into()).await,
        Command::Recommend => render(dashboard.selection().recommend().await, print_recommendation),
        Command::Run { no_meta_selection } => run(dashboard, !no_meta_selection).await,
        Command::Results => render(dashboard.selection().enter().await, print_run_result),
        Command::Insights => render(dashboard.insights().enter().await, print_profile),
        Command::Explain => render(dashboard.explainability().enter().await, print_explanation),
        Command::Report { format, out } => {
            let path = dashboard.selection().download_report(format.into(), &out).await;
            match path {
                Ok(path) => {
                    println!("Report saved to {}", path.display());
                    Ok(())
                }
                Err(err) => informational(err),
            }
        }
        Command::Monitor { ticks } => monitor(dashboard, ticks).await,
    }
}

async fn apply(dashboard: &Dashboard, action: PreprocessingAction) -> Result<()> {
    // The profile has to be loaded first so the controller knows the columns.
    dashboard.preprocessing().enter().await;
    match dashboard.preprocessing().apply(action).await {
        Ok(ActionOutcome::Applied(outcome)) => {
            info!(action = action.as_str(), "Applied");
            println!("{} applied", action.display_name());
            if !outcome.message.is_empty() {
                println!("  {}", outcome.message);
            }
            if let Some(rows) = outcome.rows_after_processing {
                println!("  Rows after processing: {}", rows);
            }
            render(dashboard.preprocessing().status(), print_profile)
        }
        Ok(ActionOutcome::AlreadyApplied) => {
            println!("{} was already applied to this dataset", action.display_name());
            Ok(())
        }
        Err(err) => informational(err),
    }
}

async fn run(dashboard: &Dashboard, use_meta_selection: bool) -> Result<()> {
    println!("Running algorithm selection, this can take a few minutes...");
    match dashboard.selection().run(use_meta_selection).await {
        Ok(result) => {
            print_run_result(&result);
            Ok(())
        }
        Err(err) => informational(err),
    }
}

async fn monitor(dashboard: &Dashboard, ticks: u32) -> Result<()> {
    let monitoring = dashboard.monitoring();
    let status = monitoring.enter().await;
    render(status, print_snapshot)?;

    let interval = dashboard.config().stats_interval;
    for _ in 0..ticks {
        tokio::time::sleep(interval + Duration::from_millis(50)).await;
        render(monitoring.status(), print_snapshot)?;
    }
    monitoring.leave();
    Ok(())
}

/// Print a stage status. Only `Error` is a failure.
fn render<T>(status: StageStatus<T>, print: impl FnOnce(&T)) -> Result<()> {
    match status {
        StageStatus::Ready(value) => {
            print(&value);
            Ok(())
        }
        StageStatus::Error { kind, message, .. } => {
            if kind == ErrorKind::Unauthenticated {
                Err(anyhow!("{}. Run `algoselector login` first.", message))
            } else {
                Err(anyhow!("{}", message))
            }
        }
        StageStatus::Idle => {
            println!("Nothing to show yet");
            Ok(())
        }
        other => {
            if let Some(message) = other.message() {
                println!("{}", message);
            }
            Ok(())
        }
    }
}

/// Expected absences and empty outcomes are printed; everything else fails.
fn informational(err: PipelineError) -> Result<()> {
    let status = StageStatus::<()>::from_error(&err);
    render(status, |_| {})
}

fn print_status(dashboard: &Dashboard) {
    let session = dashboard.session().snapshot();
    println!("Service:  {}", dashboard.config().base_url);
    println!(
        "Signed in: {}",
        if session.credential.is_some() { "yes" } else { "no" }
    );
    println!("Dataset:  {}", session.dataset_id.as_deref().unwrap_or("-"));
    println!("Target:   {}", session.target_column.as_deref().unwrap_or("-"));
    println!();
    for stage in Stage::ALL {
        match dashboard.guard().require(stage) {
            Ok(_) => println!("  {:<20} ready", stage.display_name()),
            Err(missing) => println!("  {:<20} {}", stage.display_name(), missing),
        }
    }
}

fn print_dataset(dataset: &Dataset) {
    println!("Dataset {} uploaded", dataset.id);
    println!("  Rows: {}", dataset.row_count);
    println!("  Columns: {}", dataset.column_count);
    println!("  Missing values: {}", dataset.total_missing());
    if let Some(target) = &dataset.suggested_target {
        println!("  Suggested target: {}", target);
    }
    println!();
    println!("{:<24} {:<12} {:>8}", "Column", "Type", "Missing");
    println!("{}", "-".repeat(46));
    for column in &dataset.columns {
        println!(
            "{:<24} {:<12} {:>8}",
            truncate_str(&column.name, 23),
            column.dtype,
            column.missing_count
        );
    }
}

fn print_profile(report: &ProfilingReport) {
    println!(
        "{} rows x {} columns, {} missing values",
        report.rows, report.columns, report.total_missing_values
    );
    if !report.meta_features.is_empty() {
        println!();
        println!("Meta-features:");
        for (name, value) in &report.meta_features {
            println!("  {:<28} {}", name, value);
        }
    }
    if !report.preprocessing_suggestions.is_empty() {
        println!();
        println!("Suggested actions:");
        for suggestion in &report.preprocessing_suggestions {
            println!(
                "  - {:<10} {}",
                suggestion.action.as_str(),
                suggestion.rationale
            );
        }
    }
}

fn print_recommendation(recommendation: &Recommendation) {
    println!("Top algorithm: {}", recommendation.top_algorithm);
    println!("Imbalance ratio: {:.2}", recommendation.imbalance_ratio);
    for algorithm in &recommendation.algorithms {
        println!(
            "  {:<28} accuracy {:.3}  time {:.2}s",
            algorithm.name, algorithm.accuracy, algorithm.training_time
        );
    }
    if !recommendation.simple_explanation.is_empty() {
        println!();
        println!("{}", recommendation.simple_explanation);
    }
}

fn print_run_result(result: &RunResult) {
    if let Some(best) = &result.best_algorithm {
        println!("Best algorithm: {}", best);
    }
    println!();
    println!(
        "{:<28} {:>9} {:>9} {:>10}",
        "Algorithm", "Accuracy", "F1", "Time (s)"
    );
    println!("{}", "-".repeat(60));
    for algorithm in &result.algorithms {
        println!(
            "{:<28} {:>9.3} {:>9.3} {:>10.2}",
            truncate_str(&algorithm.name, 27),
            algorithm.accuracy,
            algorithm.f1_score,
            algorithm.training_time
        );
    }
    if !result.selection_reason.is_empty() {
        println!();
        println!("{}", result.selection_reason);
    }
    for tip in &result.tips {
        println!("  tip: {}", tip);
    }
}

fn print_explanation(explanation: &Explanation) {
    println!(
        "Best algorithm: {}",
        explanation.best_algorithm.as_deref().unwrap_or("-")
    );
    if !explanation.selection_reason.is_empty() {
        println!("{}", explanation.selection_reason);
    }
    for part in &explanation.reason_parts {
        println!("  - {}", part);
    }
    let ranked = explanation.ranked_features();
    if !ranked.is_empty() {
        println!();
        println!("Feature importance:");
        for feature in ranked.iter().take(10) {
            println!("  {:<28} {:.4}", truncate_str(&feature.name, 27), feature.value);
        }
    }
}

fn print_snapshot(snapshot: &MonitoringSnapshot) {
    match &snapshot.stats {
        Some(stats) => println!(
            "CPU {:>5.1}%  RAM {:>5.1}%  models {}  requests {}  uptime {}  [{}]",
            stats.cpu_usage,
            stats.ram_usage,
            stats.active_models,
            stats.total_requests,
            stats.uptime,
            stats.status
        ),
        None => println!("No system stats yet"),
    }
    if let Some(err) = &snapshot.stats_error {
        println!("  stats unavailable: {}", err);
    }
    if let Some(err) = &snapshot.logs_error {
        println!("  logs unavailable: {}", err);
    }
    for entry in snapshot.logs.iter().take(5) {
        println!("  {} {:<30} {}", entry.timestamp, entry.action, entry.status);
    }
    println!("  history: {} samples", snapshot.history.len());
}

/// Truncate a string to max length with ellipsis
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
