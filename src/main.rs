//! BatchPress CLI - Bulk Image Compression
//!
//! Compresses files or whole directories through a bounded worker pool and
//! keeps a running record of how much space was saved.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use batchpress::config::{IsolationMode, Presets};
use batchpress::parallel::serve_stdio;
use batchpress::processing::formats::{is_supported_image, supported_input_formats, supported_output_formats};
use batchpress::{
    init_with_config, BatchOutcome, CompressionResult, CompressionService, Config, ImageFormat,
    ProcessingEngine, ProgressCallback, SettingsOverrides,
};

/// BatchPress - Bulk Image Compression
#[derive(Parser)]
#[command(
    name = "batchpress",
    version,
    about = "Compress many images at once and keep track of the space saved",
    long_about = "BatchPress compresses JPEG, PNG and WebP images (and converts other formats) \
                  through a bounded pool of isolated workers. Every successful compression is \
                  recorded so totals and daily savings can be reviewed later."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML or YAML)
    #[arg(short, long, global = true, value_name = "FILE", env = "BATCHPRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding history and statistics
    #[arg(long, global = true, value_name = "DIR", env = "BATCHPRESS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'Q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Compress files or directories
    Compress(CompressArgs),
    /// Show compression statistics
    Stats {
        /// Number of recent images to list
        #[arg(short, long, default_value = "10", value_name = "COUNT")]
        recent: usize,
        /// Erase all history and statistics
        #[arg(long)]
        clear: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List available presets
    Presets {
        /// Show the settings of each preset
        #[arg(long)]
        detailed: bool,
    },
    /// Remove scratch outputs from the temp directory
    ClearTemp,
    /// Generate example configuration file
    ExampleConfig {
        /// Output file path
        #[arg(short, long, default_value = "batchpress.toml")]
        output: PathBuf,
        /// Use YAML format instead of TOML
        #[arg(long)]
        yaml: bool,
    },
    /// Show system information and capabilities
    Info,
    /// Compress one job read from stdin (used by process isolation)
    #[command(hide = true)]
    Worker,
}

#[derive(Args)]
struct CompressArgs {
    /// Input files or directories
    #[arg(required = true, value_name = "PATH")]
    inputs: Vec<PathBuf>,

    /// Output directory (default: a new batch directory under the temp directory)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Descend into subdirectories
    #[arg(short = 'R', long)]
    recursive: bool,

    /// Named preset applied under the other flags
    #[arg(short, long, value_name = "NAME")]
    preset: Option<String>,

    /// Output quality (1-100)
    #[arg(short, long, value_name = "QUALITY", value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Convert to this format
    #[arg(short, long, value_enum, value_name = "FORMAT", conflicts_with = "keep_format")]
    format: Option<CliImageFormat>,

    /// Keep each file's own format
    #[arg(long)]
    keep_format: bool,

    /// Maximum width in pixels
    #[arg(short, long, value_name = "PIXELS")]
    width: Option<u32>,

    /// Maximum height in pixels
    #[arg(short = 'H', long, value_name = "PIXELS")]
    height: Option<u32>,

    /// Output name template, e.g. "{filename}_small"
    #[arg(long, value_name = "TEMPLATE")]
    naming: Option<String>,

    /// Number of concurrent workers (default: logical CPUs - 1)
    #[arg(short = 't', long, value_name = "COUNT")]
    workers: Option<usize>,

    /// How each file is isolated
    #[arg(long, value_enum, value_name = "MODE")]
    isolation: Option<CliIsolation>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,

    /// Do not record results in the statistics
    #[arg(long)]
    no_history: bool,
}

/// CLI-compatible image format enum
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliImageFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
    Tiff,
    Bmp,
}

impl From<CliImageFormat> for ImageFormat {
    fn from(format: CliImageFormat) -> Self {
        match format {
            CliImageFormat::Jpeg => ImageFormat::Jpeg,
            CliImageFormat::Png => ImageFormat::Png,
            CliImageFormat::Webp => ImageFormat::WebP,
            CliImageFormat::Gif => ImageFormat::Gif,
            CliImageFormat::Tiff => ImageFormat::Tiff,
            CliImageFormat::Bmp => ImageFormat::Bmp,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliIsolation {
    Thread,
    Process,
}

impl From<CliIsolation> for IsolationMode {
    fn from(mode: CliIsolation) -> Self {
        match mode {
            CliIsolation::Thread => IsolationMode::Thread,
            CliIsolation::Process => IsolationMode::Process,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{}: {:#}", style("Error").red().bold(), e);
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = Some(data_dir.clone());
    }
    if cli.quiet {
        config.logging.level = "error".to_string();
    } else if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    init_with_config(&config)?;
    if let Some(path) = &cli.config {
        info!("Loaded configuration from: {:?}", path);
    }

    match cli.command {
        Commands::Compress(args) => compress(config, args, cli.quiet).await,
        Commands::Stats { recent, clear, json } => {
            show_stats(config, recent, clear, json)?;
            Ok(0)
        }
        Commands::Presets { detailed } => {
            show_presets(&config, detailed)?;
            Ok(0)
        }
        Commands::ClearTemp => {
            let service = CompressionService::new(config)?;
            let removed = service.clear_temp_files().await?;
            println!(
                "{}: Removed {} entries from {}",
                style("Success").green().bold(),
                removed,
                service.config().processing.temp_dir().display()
            );
            Ok(0)
        }
        Commands::ExampleConfig { output, yaml } => {
            generate_example_config(&output, yaml)?;
            Ok(0)
        }
        Commands::Info => {
            show_system_info(&config);
            Ok(0)
        }
        Commands::Worker => {
            serve_stdio(&ProcessingEngine::new())?;
            Ok(0)
        }
    }
}

/// Build the user's settings: preset first, then explicit flags on top
fn settings_from_args(config: &Config, args: &CompressArgs) -> anyhow::Result<SettingsOverrides> {
    let mut settings = match &args.preset {
        Some(name) => config.get_preset(name)?,
        None => SettingsOverrides::new(),
    };

    let mut flags = SettingsOverrides::new();
    if let Some(quality) = args.quality {
        flags = flags.quality(quality);
    }
    if let Some(format) = args.format {
        flags = flags.output_format(ImageFormat::from(format).extension());
    }
    if args.keep_format {
        flags = flags.keep_format(true);
    }
    if args.width.is_some() || args.height.is_some() {
        flags = flags.resize(args.width, args.height);
    }
    if let Some(template) = &args.naming {
        flags = flags.file_naming(template.as_str());
    }

    settings = settings.overlay(&flags);
    settings.validate()?;
    Ok(settings)
}

async fn compress(mut config: Config, args: CompressArgs, quiet: bool) -> anyhow::Result<i32> {
    if let Some(workers) = args.workers {
        if workers == 0 {
            bail!("Worker count must be greater than 0");
        }
        config.processing.max_workers = Some(workers);
    }
    if let Some(isolation) = args.isolation {
        config.processing.isolation = isolation.into();
    }

    let settings = settings_from_args(&config, &args)?;
    let files = discover_files(&args.inputs, args.recursive)?;
    if files.is_empty() {
        bail!("No supported image files found");
    }
    info!("Found {} files to compress", files.len());

    let service = CompressionService::new(config)?;

    let progress = if !args.json && !quiet {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let on_progress: Option<ProgressCallback> = progress.clone().map(|pb| {
        let callback: ProgressCallback = Arc::new(move |current: usize, _total: usize, result: &CompressionResult| {
            pb.set_position(current as u64);
            pb.set_message(
                result
                    .original_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );
        });
        callback
    });

    let start_time = Instant::now();
    let outcome = service
        .compress_batch(&files, &settings, args.output.as_deref(), on_progress)
        .await;

    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }

    if !outcome.success {
        bail!(outcome.error.unwrap_or_else(|| "Batch rejected".to_string()));
    }

    if !args.no_history {
        if let Err(e) = service.record_results(&outcome.results) {
            warn!("Results were not recorded: {}", e);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome, start_time.elapsed());
    }

    let failed = outcome.results.iter().filter(|r| !r.success).count();
    Ok(if failed > 0 { 1 } else { 0 })
}

/// Expand inputs into a sorted list of image files
fn discover_files(inputs: &[PathBuf], recursive: bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_file() {
            // Explicit files are always attempted; unsupported ones fail on their own
            files.push(input.clone());
        } else if input.is_dir() {
            let walker = WalkDir::new(input)
                .min_depth(1)
                .max_depth(if recursive { usize::MAX } else { 1 })
                .sort_by_file_name();

            for entry in walker {
                let entry = entry.with_context(|| format!("Failed to read {}", input.display()))?;
                if entry.file_type().is_file() && is_supported_image(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else {
            bail!("Input path does not exist: {}", input.display());
        }
    }

    debug!("Discovered {} files", files.len());
    Ok(files)
}

fn show_stats(config: Config, recent: usize, clear: bool, json_output: bool) -> anyhow::Result<()> {
    let service = CompressionService::new(config)?;

    if clear {
        service.clear_all_data()?;
        println!("{}: Statistics cleared", style("Success").green().bold());
        return Ok(());
    }

    let snapshot = service.get_stats();
    let images = service.get_recent_images(recent);

    if json_output {
        let report = json!({
            "stats": snapshot.stats,
            "today": snapshot.today,
            "recent": images,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let stats = &snapshot.stats;
    println!("{}", style("Compression Statistics:").bold());
    println!("  {}: {}", style("Images").green(), stats.total_processed_images);
    println!(
        "  {}: {} → {}",
        style("Size").cyan(),
        format_bytes(stats.total_original_size as i64),
        format_bytes(stats.total_compressed_size as i64)
    );
    println!(
        "  {}: {} ({})",
        style("Saved").cyan(),
        format_bytes(stats.total_saved_space),
        stats.average_compression_rate
    );
    println!(
        "  {}: {} images, {} saved",
        style("Today").blue(),
        snapshot.today.processed_images,
        format_bytes(snapshot.today.saved_space)
    );

    if !images.is_empty() {
        println!();
        println!("{}", style("Recent Images:").bold());
        for image in &images {
            println!(
                "  {} {} → {} ({}, {}x{} {})",
                style(&image.name).cyan(),
                format_bytes(image.original_size as i64),
                format_bytes(image.compressed_size as i64),
                image.compression_rate,
                image.width,
                image.height,
                image.format
            );
        }
    }

    Ok(())
}

/// Show available presets, user-defined ones included
fn show_presets(config: &Config, detailed: bool) -> anyhow::Result<()> {
    println!("{}", style("Available Presets:").bold());
    println!();

    let mut presets = Presets::all();
    for (name, preset) in &config.presets {
        presets.insert(name.clone(), preset.clone());
    }

    for (name, preset) in &presets {
        let marker = if config.presets.contains_key(name) { " (user)" } else { "" };
        println!("{}{}", style(name).cyan().bold(), style(marker).dim());
        if detailed {
            println!("  {}", serde_json::to_string(preset)?);
            println!();
        }
    }

    if !detailed {
        println!();
        println!("Use {} for detailed information", style("--detailed").dim());
    }
    Ok(())
}

/// Generate example configuration file
fn generate_example_config(output_path: &Path, use_yaml: bool) -> anyhow::Result<()> {
    let output_path = if use_yaml && !matches!(
        output_path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    ) {
        output_path.with_extension("yaml")
    } else {
        output_path.to_path_buf()
    };

    Config::default().to_file(&output_path)?;

    let format = if use_yaml { "YAML" } else { "TOML" };
    println!(
        "{}: Generated example {} configuration: {}",
        style("Success").green().bold(),
        format,
        output_path.display()
    );
    Ok(())
}

/// Show system information
fn show_system_info(config: &Config) {
    use sysinfo::{CpuExt, System, SystemExt};

    println!("{}", style("BatchPress System Information").bold());
    println!();
    println!("{}: {}", style("Version").bold(), batchpress::VERSION);
    println!();

    let mut system = System::new_all();
    system.refresh_all();

    println!("{}", style("System:").bold());
    if let Some(name) = system.name() {
        println!("  OS: {}", name);
    }
    if let Some(version) = system.os_version() {
        println!("  Version: {}", version);
    }
    println!("  CPUs: {}", num_cpus::get());
    if let Some(cpu) = system.cpus().first() {
        println!("  CPU: {} ({:.2} GHz)", cpu.brand(), cpu.frequency() as f64 / 1000.0);
    }
    println!(
        "  Memory: {:.2} GB total, {:.2} GB available",
        system.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0,
        system.available_memory() as f64 / 1024.0 / 1024.0 / 1024.0
    );
    println!();

    println!("{}", style("Compression:").bold());
    println!("  Workers: {}", config.processing.worker_count());
    println!("  Isolation: {:?}", config.processing.isolation);
    println!("  Temp dir: {}", config.processing.temp_dir().display());
    println!("  Data dir: {}", config.storage.data_dir().display());
    println!();

    println!("{}", style("Supported Formats:").bold());
    println!("  Input: {}", supported_input_formats().join(", "));
    println!("  Output: {}", supported_output_formats().join(", "));
}

/// Print processing summary
fn print_summary(outcome: &BatchOutcome, duration: std::time::Duration) {
    let succeeded: Vec<_> = outcome.results.iter().filter(|r| r.success).collect();
    let failed: Vec<_> = outcome.results.iter().filter(|r| !r.success).collect();

    println!();
    println!("{}", style("Compression Summary:").bold());
    println!("  {}: {}", style("Compressed").green(), succeeded.len());
    if !failed.is_empty() {
        println!("  {}: {}", style("Failed").red(), failed.len());
        for result in &failed {
            println!(
                "    {} {}",
                result.original_path.display(),
                style(result.error.as_deref().unwrap_or("unknown error")).dim()
            );
        }
    }
    println!("  {}: {:.2}s", style("Duration").blue(), duration.as_secs_f64());
    println!("  {}: {}", style("Output").blue(), outcome.output_dir.display());

    if !succeeded.is_empty() {
        let total_in: u64 = succeeded.iter().map(|r| r.original_size).sum();
        let total_out: u64 = succeeded.iter().map(|r| r.compressed_size).sum();

        println!(
            "  {}: {} → {} ({})",
            style("Size").cyan(),
            format_bytes(total_in as i64),
            format_bytes(total_out as i64),
            batchpress::processing::compression_rate(total_in, total_out)
        );
    }
}

fn format_bytes(bytes: i64) -> String {
    let sign = if bytes < 0 { "-" } else { "" };
    let bytes = bytes.unsigned_abs() as f64;
    if bytes >= 1024.0 * 1024.0 {
        format!("{}{:.2}MB", sign, bytes / 1024.0 / 1024.0)
    } else if bytes >= 1024.0 {
        format!("{}{:.1}KB", sign, bytes / 1024.0)
    } else {
        format!("{}{}B", sign, bytes)
    }
}
