// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{error, info, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use inkbridge::app_config::{self, Config, TranslationProvider};
use inkbridge::app_controller::Controller;
use inkbridge::continuity::CarryoverJournal;

/// CLI Wrapper for TranslationProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslationProvider {
    Ollama,
    OpenAI,
    Anthropic,
    LMStudio,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::Ollama => TranslationProvider::Ollama,
            CliTranslationProvider::OpenAI => TranslationProvider::OpenAI,
            CliTranslationProvider::Anthropic => TranslationProvider::Anthropic,
            CliTranslationProvider::LMStudio => TranslationProvider::LMStudio,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate a directory of page images (default command)
    Translate(TranslateArgs),

    /// Generate shell completions for inkbridge
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug, Clone)]
struct TranslateArgs {
    /// Directory of page images, read in natural filename order
    #[arg(value_name = "INPUT_DIR")]
    input_dir: PathBuf,

    /// Output directory (defaults to `<INPUT_DIR>/translated`)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Force overwrite of existing output files
    #[arg(short, long)]
    force_overwrite: bool,

    /// Translation provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliTranslationProvider>,

    /// Model name to use for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Source language code (e.g., 'ja', 'ko', 'zh')
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language code (e.g., 'en', 'fr')
    #[arg(short, long)]
    target_language: Option<String>,

    /// Pages processed concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Disable cross-page continuity linking
    #[arg(long)]
    no_continuity: bool,

    /// Record carryover hand-offs in the default SQLite journal
    #[arg(long)]
    journal: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: String,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

#[derive(Parser, Debug)]
#[command(
    name = "inkbridge",
    version,
    args_conflicts_with_subcommands = true,
    about = "Translate comic and manga pages with OCR sidecars and LLM providers",
    after_help = "Each page image is expected to have an OCR sidecar next to it, e.g. \
    `001.png.ocr.json`. Outputs are `<page>.translation.json`, the erased page image and a \
    quality report per page.

SUPPORTED PROVIDERS:
    ollama    - Local Ollama server (default: qwen2.5:7b)
    openai    - OpenAI API (requires API key)
    anthropic - Anthropic Claude API (requires API key)
    lmstudio  - LM Studio local server (OpenAI-compatible on http://localhost:1234/v1)"
)]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    translate: Option<TranslateArgs>,
}

// @struct: Custom logger implementation
struct CustomLogger;

impl CustomLogger {
    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI colour for a level
    fn colour_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "\x1B[{}m{} {:<5} {}\x1B[0m",
                Self::colour_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Level is refined once the config is loaded
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();
    match cli.command {
        Some(Commands::Completions { shell }) => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "inkbridge", &mut std::io::stdout());
            Ok(())
        }
        Some(Commands::Translate(args)) => run_translate(args).await,
        None => {
            let args = cli
                .translate
                .ok_or_else(|| anyhow!("INPUT_DIR is required when no subcommand is specified"))?;
            run_translate(args).await
        }
    }
}

/// Apply command line overrides on top of the file configuration
fn apply_overrides(config: &mut Config, options: &TranslateArgs) -> Result<()> {
    if let Some(provider) = &options.provider {
        config.translation.provider = provider.clone().into();
    }
    if let Some(model) = &options.model {
        if let Some(provider_config) = config.translation.active_provider_config_mut() {
            provider_config.model = model.clone();
        }
    }
    if let Some(source_lang) = &options.source_language {
        config.source_language = source_lang.clone();
    }
    if let Some(target_lang) = &options.target_language {
        config.target_language = target_lang.clone();
    }
    if let Some(concurrency) = options.concurrency {
        config.pipeline.max_concurrency = concurrency;
    }
    if options.no_continuity {
        config.continuity.enabled = false;
    }
    if options.journal && config.pipeline.journal_path.is_none() {
        config.pipeline.journal_path = Some(CarryoverJournal::default_path()?);
    }
    if let Some(log_level) = &options.log_level {
        config.log_level = log_level.clone().into();
    }
    Ok(())
}

async fn run_translate(options: TranslateArgs) -> Result<()> {
    if let Some(cmd_log_level) = &options.log_level {
        let level: app_config::LogLevel = cmd_log_level.clone().into();
        log::set_max_level(LevelFilter::from(&level));
    }

    let mut config = Config::load_or_create(Path::new(&options.config_path))?;
    apply_overrides(&mut config, &options)?;
    config.validate().context("Configuration validation failed")?;
    log::set_max_level(LevelFilter::from(&config.log_level));

    if !options.input_dir.is_dir() {
        return Err(anyhow!("Input directory does not exist: {:?}", options.input_dir));
    }
    let output_dir = options
        .output_dir
        .clone()
        .unwrap_or_else(|| options.input_dir.join("translated"));

    let controller = Controller::with_config(config)?;
    let summary = controller
        .run_folder(options.input_dir.clone(), output_dir.clone(), options.force_overwrite)
        .await?;

    if summary.failed > 0 {
        error!("{} of {} pages failed, see reports in {:?}", summary.failed, summary.pages, output_dir);
    } else {
        info!("Success: {:?}", output_dir);
    }
    Ok(())
}
