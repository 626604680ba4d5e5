//! CLI binary for edgequake-attendance.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the resulting table.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_attendance::{
    process_file, process_to_file, AttemptError, AttendanceTable, ExtractionConfig, OutputFormat, Passthrough,
    ProgressCallback, RecognitionProgressCallback, SecretsFile, SheetPreprocessor, DEFAULT_MODEL,
    MAX_DATE_COLUMNS,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner plus one log line per failed key.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading image…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl RecognitionProgressCallback for CliProgressCallback {
    fn on_recognition_start(&self, total_keys: usize) {
        self.bar.set_prefix("Reading sheet");
        self.bar.set_message(format!("{total_keys} key(s) available"));
    }

    fn on_attempt_start(&self, key: usize, total_keys: usize) {
        self.bar.set_message(format!("key {key}/{total_keys}"));
    }

    fn on_attempt_failed(&self, key: usize, total_keys: usize, error: &AttemptError) {
        let msg = error.to_string();
        // Truncate very long error messages to keep output tidy.
        let msg = if msg.chars().count() > 100 {
            format!("{}\u{2026}", msg.chars().take(99).collect::<String>())
        } else {
            msg
        };
        self.bar.println(format!(
            "  {} Key {}/{}  {}  {}",
            red("✗"),
            key,
            total_keys,
            dim(error.kind()),
            red(&msg),
        ));
    }

    fn on_recognition_complete(&self, key: usize, total_keys: usize, text_len: usize) {
        self.bar.println(format!(
            "  {} Key {}/{}  {}",
            green("✓"),
            key,
            total_keys,
            dim(&format!("{text_len} chars")),
        ));
        self.bar.set_prefix("Normalising");
        self.bar.set_message("");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Sheet with 6 date columns, CSV on stdout
  sheet2csv -n 6 register.jpg

  # Markdown table written to a file
  sheet2csv -n 5 --format markdown scan.png -o week12.md

  # Use a specific key first, then the configured pool
  sheet2csv -n 4 --api-key AIza... sheet.jpg

  # Keys from a TOML secrets file (GOOGLE_API_KEYS = "k1, k2")
  sheet2csv -n 4 --secrets .streamlit/secrets.toml sheet.jpg

  # Image from a URL, JSON output
  sheet2csv -n 3 --format json https://example.org/sheet.jpg

KEY RESOLUTION ORDER:
  1. --api-key (if not blank)
  2. GOOGLE_API_KEYS in the --secrets file, when given and readable
  3. GOOGLE_API_KEYS environment variable
  4. GOOGLE_API_KEYS in ./.env
  Keys are comma-separated, trimmed, and deduplicated. Each key is tried
  once, in order, until one returns a result.

ENVIRONMENT VARIABLES:
  GOOGLE_API_KEYS         Comma-separated Gemini API keys
  GOOGLE_GEMINI_MODEL     Override model ID (default: gemini-2.5-flash)
  RUST_LOG                Override log filter (e.g. edgequake_attendance=debug)
"#;

/// Convert attendance-sheet photos to CSV using a Vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "sheet2csv",
    version,
    about = "Convert attendance-sheet photos to CSV/Markdown/JSON using a Vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image path or HTTP/HTTPS URL.
    input: String,

    /// Number of date columns on the sheet.
    #[arg(
        short = 'n',
        long,
        env = "SHEET2CSV_COLUMNS",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(0..=MAX_DATE_COLUMNS as u64)
    )]
    columns: usize,

    /// Write the table to this file instead of stdout.
    #[arg(short, long, env = "SHEET2CSV_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format: csv, markdown, json.
    #[arg(long, env = "SHEET2CSV_FORMAT", value_enum, default_value = "csv")]
    format: FormatArg,

    /// API key tried before any configured key.
    #[arg(long, env = "SHEET2CSV_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// TOML secrets file holding GOOGLE_API_KEYS.
    #[arg(long, env = "SHEET2CSV_SECRETS")]
    secrets: Option<PathBuf>,

    /// Gemini model ID.
    #[arg(long, env = "GOOGLE_GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// API base URL (scheme + host).
    #[arg(long, env = "SHEET2CSV_ENDPOINT")]
    endpoint: Option<String>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "SHEET2CSV_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Max model output tokens.
    #[arg(long, env = "SHEET2CSV_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: u32,

    /// Per-request timeout in seconds.
    #[arg(long, env = "SHEET2CSV_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, env = "SHEET2CSV_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Longest image edge in pixels after preprocessing.
    #[arg(long, env = "SHEET2CSV_MAX_DIMENSION", default_value_t = 2400)]
    max_dimension: u32,

    /// Convert the image to grayscale before upload.
    #[arg(long, env = "SHEET2CSV_GRAYSCALE")]
    grayscale: bool,

    /// Send the image exactly as loaded.
    #[arg(long, conflicts_with_all = ["grayscale", "max_dimension"])]
    no_preprocess: bool,

    /// Disable the spinner.
    #[arg(long, env = "SHEET2CSV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SHEET2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SHEET2CSV_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Csv,
    Markdown,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already reports each key; keep library INFO logs out of
    // its way unless explicitly asked for.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as ProgressCallback),
    )?;

    // ── Run extraction ───────────────────────────────────────────────────
    let format = OutputFormat::from(cli.format);
    let api_key = cli.api_key.as_deref();
    let result = match &cli.output {
        Some(path) => process_to_file(&cli.input, path, format, cli.columns, api_key, &config).await,
        None => process_file(&cli.input, cli.columns, api_key, &config).await,
    };
    if let Some(cb) = &progress {
        cb.finish();
    }
    let table = result.context("Extraction failed")?;

    if cli.output.is_none() {
        let rendered = table.render(format).context("Failed to render table")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(rendered.as_bytes())
            .context("Failed to write to stdout")?;
    }

    if !cli.quiet {
        print_summary(&table, cli.output.as_deref());
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .model(cli.model.clone())
        .temperature(cli.temperature)
        .max_output_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref endpoint) = cli.endpoint {
        builder = builder.endpoint(endpoint.clone());
    }

    // Secrets file shadows the environment variable.
    if let Some(ref path) = cli.secrets {
        builder = builder.prepend_credential_source(Arc::new(SecretsFile::new(path)));
    }

    builder = if cli.no_preprocess {
        builder.preprocessor(Arc::new(Passthrough))
    } else {
        builder.preprocessor(Arc::new(SheetPreprocessor::new(
            cli.max_dimension,
            cli.grayscale,
        )))
    };

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(table: &AttendanceTable, path: Option<&Path>) {
    let line = format!(
        "{} {} students × {} dates",
        green("✔"),
        bold(&table.len().to_string()),
        table.expected_columns(),
    );
    match path {
        Some(p) => eprintln!("{line}  →  {}", bold(&p.display().to_string())),
        None => eprintln!("{line}"),
    }
}
