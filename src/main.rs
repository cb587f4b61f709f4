// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{anyhow, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{error, info, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::path::PathBuf;

use linewise::app_config::{Config, ConfigOverrides, LogLevel};
use linewise::translation::document::OutputMode;
use linewise::translation::quality::JudgeMode;
use linewise::Controller;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => LogLevel::Error,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliOutputMode {
    Bilingual,
    TargetOnly,
}

impl From<CliOutputMode> for OutputMode {
    fn from(mode: CliOutputMode) -> Self {
        match mode {
            CliOutputMode::Bilingual => OutputMode::Bilingual,
            CliOutputMode::TargetOnly => OutputMode::TargetOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliJudgeMode {
    Disabled,
    Escalate,
    Primary,
}

impl From<CliJudgeMode> for JudgeMode {
    fn from(mode: CliJudgeMode) -> Self {
        match mode {
            CliJudgeMode::Disabled => JudgeMode::Disabled,
            CliJudgeMode::Escalate => JudgeMode::Escalate,
            CliJudgeMode::Primary => JudgeMode::Primary,
        }
    }
}

/// Options shared by every command that talks to the service
#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long)]
    endpoint: Option<String>,

    /// API key sent as bearer token
    #[arg(long, env = "LINEWISE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model name to use for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Source language code (e.g., 'ja', 'en')
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language code (e.g., 'zh', 'en')
    #[arg(short, long)]
    target_language: Option<String>,

    /// Quality judge participation
    #[arg(long, value_enum)]
    judge: Option<CliJudgeMode>,
}

#[derive(Args, Debug, Clone)]
struct TranslateArgs {
    /// Input documents or directories of .txt files
    #[arg(value_name = "INPUT")]
    inputs: Vec<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,

    /// Ignore existing output instead of resuming from it
    #[arg(short, long)]
    force_overwrite: bool,

    /// Output layout
    #[arg(short, long, value_enum)]
    output_mode: Option<CliOutputMode>,

    /// Lines per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Translate at most this many files
    #[arg(long)]
    limit: Option<usize>,

    /// Wall-clock budget per document in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Translate front-matter fields only
    #[arg(long)]
    metadata_only: bool,

    /// Write timestamped outputs that are never resumed
    #[arg(long)]
    debug: bool,
}

#[derive(Args, Debug, Clone)]
struct EnhanceArgs {
    /// Bilingual output files to revise in place
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate documents (default command)
    Translate(TranslateArgs),

    /// Revise weak lines of existing bilingual outputs
    Enhance(EnhanceArgs),

    /// Generate shell completions for linewise
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// linewise - line-batch document translation with LLMs
#[derive(Parser, Debug)]
#[command(name = "linewise")]
#[command(version)]
#[command(about = "Adaptive line-batch document translation over streaming LLM services")]
#[command(args_conflicts_with_subcommands = true)]
#[command(long_about = "linewise translates long plain-text documents line by line through an OpenAI-compatible streaming API.

EXAMPLES:
    linewise novel.txt                          # Translate using default config
    linewise -f novel.txt                       # Ignore the existing output and start over
    linewise -s ja -t en -o target-only books/  # Translate a directory to English only
    linewise --limit 3 --timeout 1800 books/    # At most 3 files, 30 minutes each
    linewise enhance novel_bilingual.txt        # Revise weak lines of an earlier output
    linewise completions bash > linewise.bash   # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    translate: TranslateArgs,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger { level: LevelFilter::Trace }))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Glyph and ANSI color for a level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("❌ ", "1;31"),
            Level::Warn => ("🚧 ", "1;33"),
            Level::Info => (" ", "1;32"),
            Level::Debug => ("🔍 ", "1;36"),
            Level::Trace => ("📋 ", "1;35"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            let (glyph, color) = Self::style_for_level(record.level());
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "\x1B[{}m{} {} {}\x1B[0m", color, now, glyph, record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Load the configuration, apply command line values and validate
fn load_config(common: &CommonArgs, mut overrides: ConfigOverrides) -> Result<Config> {
    // Apply the command line level early so config loading is logged at it
    if let Some(level) = common.log_level {
        log::set_max_level(LogLevel::from(level).to_level_filter());
    }

    let mut config = Config::load_or_create(&common.config_path)?;
    overrides.endpoint = common.endpoint.clone();
    overrides.api_key = common.api_key.clone();
    overrides.model = common.model.clone();
    overrides.source_language = common.source_language.clone();
    overrides.target_language = common.target_language.clone();
    overrides.judge_mode = common.judge.map(JudgeMode::from);
    overrides.log_level = common.log_level.map(LogLevel::from);
    config.apply_overrides(&overrides);

    config.validate().context("Configuration validation failed")?;
    log::set_max_level(config.log_level.to_level_filter());
    Ok(config)
}

async fn run_translate(args: TranslateArgs) -> Result<()> {
    if args.inputs.is_empty() {
        return Err(anyhow!("At least one INPUT is required"));
    }
    let overrides = ConfigOverrides {
        batch_size: args.batch_size,
        output_mode: args.output_mode.map(OutputMode::from),
        document_timeout_secs: args.timeout,
        overwrite: args.force_overwrite,
        debug: args.debug,
        metadata_only: args.metadata_only,
        ..Default::default()
    };
    let config = load_config(&args.common, overrides)?;
    info!(
        "Translating {} → {} with {} at {}",
        config.source_language, config.target_language, config.service.model, config.service.endpoint
    );

    let controller = Controller::with_config(config);
    let summary = controller.run_translate(&args.inputs, args.limit).await?;
    summary.log();
    Ok(())
}

async fn run_enhance(args: EnhanceArgs) -> Result<()> {
    let config = load_config(&args.common, ConfigOverrides::default())?;
    let controller = Controller::with_config(config);
    let summary = controller.run_enhance(&args.files).await?;
    summary.log();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Info until the configuration says otherwise
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();
    let result = match cli.command {
        Some(Commands::Completions { shell }) => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "linewise", &mut std::io::stdout());
            Ok(())
        }
        Some(Commands::Translate(args)) => run_translate(args).await,
        Some(Commands::Enhance(args)) => run_enhance(args).await,
        None => run_translate(cli.translate).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
