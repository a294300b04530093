use clap::{Parser, Subcommand};
use pixmill::animation::{self, OptimizeOutcome};
use pixmill::codec;
use pixmill::config::ConfigFile;
use pixmill::params::{
    AspectMode, ConversionParams, DisposalMethod, GifCreationParams, GifOptimizationParams,
    OutputFormat,
};
use pixmill::pipeline::{self, BatchObserver, CancelToken};
use pixmill::store::HistoryStore;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// File extensions the CLI picks up when expanding input directories.
const INPUT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tiff", "tif", "gif"];

/// Shared flags for commands that resize images.
#[derive(clap::Args, Clone)]
struct ResizeArgs {
    /// Target width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Target height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Scale to the exact dimensions instead of fitting within them
    #[arg(long)]
    stretch: bool,
}

impl ResizeArgs {
    fn apply(&self, params: ConversionParams) -> Result<ConversionParams, Box<dyn std::error::Error>> {
        let mut params = params;
        if self.width.is_some() || self.height.is_some() {
            params = params.with_resize(self.width, self.height)?;
        }
        if self.stretch {
            params = params.with_aspect(AspectMode::Stretch);
        }
        Ok(params)
    }
}

#[derive(Parser)]
#[command(name = "pixmill")]
#[command(about = "Batch image conversion with a persisted history ledger")]
#[command(version)]
struct Cli {
    /// Directory for the history database and settings file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert images to another format
    Convert {
        /// Source files or directories (directories are expanded recursively)
        inputs: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "converted")]
        output: PathBuf,

        /// Target format: png, jpg, webp, ico, gif
        #[arg(short, long)]
        format: String,

        /// Encoding quality 1-100 (defaults from settings)
        #[arg(short, long)]
        quality: Option<u8>,

        #[command(flatten)]
        resize: ResizeArgs,
    },
    /// Describe an image file without converting it
    Inspect { path: PathBuf },
    /// Animated GIF operations
    #[command(subcommand)]
    Gif(GifCommand),
    /// Show recent conversion history
    History {
        /// Maximum rows to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show aggregate conversion statistics
    Stats,
    /// Delete all conversion history
    ClearHistory {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Reclaim history database file space
    Compact,
    /// Settings file operations
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum GifCommand {
    /// Build an animated GIF from still images
    Create {
        /// Source still images, in frame order
        inputs: Vec<PathBuf>,

        /// Output GIF path
        #[arg(short, long, default_value = "animation.gif")]
        output: PathBuf,

        /// Per-frame display duration in milliseconds
        #[arg(long, default_value_t = 500)]
        duration: u32,

        /// Number of loops; 0 loops forever
        #[arg(long, default_value_t = 0)]
        loops: u16,

        /// Palette quality 1-100
        #[arg(short, long, default_value_t = 85)]
        quality: u8,

        #[command(flatten)]
        resize: ResizeArgs,
    },
    /// Re-encode an existing GIF with a reduced palette
    Optimize {
        input: PathBuf,

        /// Output GIF path (defaults to <input>_optimized.gif)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum palette colors per frame
        #[arg(long, default_value_t = 256)]
        colors: u16,

        /// Disable error-diffusion dithering
        #[arg(long)]
        no_dither: bool,

        /// Frame disposal: 0 any, 1 keep, 2 background, 3 previous
        #[arg(long, default_value_t = 2)]
        disposal: u8,
    },
    /// Split a GIF into numbered still images
    Extract {
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "frames")]
        output: PathBuf,

        /// Format for the extracted stills
        #[arg(short, long, default_value = "png")]
        format: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the current settings as JSON
    Show,
    /// Set one settings key, e.g. `conversion.jpeg_quality 90`
    Set { key: String, value: String },
}

/// Observer that prints one line per processed file.
struct ConsoleObserver;

impl BatchObserver for ConsoleObserver {
    fn on_progress(&self, done: usize, total: usize) {
        println!("[{done}/{total}]");
    }

    fn on_item_done(&self, source: &Path) {
        println!("  ok     {}", source.display());
    }

    fn on_item_failed(&self, source: &Path, message: &str) {
        println!("  FAILED {}: {message}", source.display());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .ok_or("cannot determine a data directory; pass --data-dir")?
            .join("pixmill"),
    };
    let config = ConfigFile::new(&data_dir.join("config.json"));

    match cli.command {
        Command::Convert {
            inputs,
            output,
            format,
            quality,
            resize,
        } => {
            let settings = config.load()?;
            let format = OutputFormat::parse(&format)?;
            let files = expand_inputs(&inputs)?;
            if files.is_empty() {
                return Err("no image files found in the given inputs".into());
            }

            let quality = quality.unwrap_or_else(|| settings.quality_for(format.ext()));
            let mut params = ConversionParams::new(format).with_quality(quality);
            params = params.with_png_compression(settings.conversion.png_compression)?;
            params = resize.apply(params)?;

            let store = HistoryStore::open(&data_dir.join("history.db"))?;
            let completed = pipeline::run(
                &files,
                &output,
                &params,
                &store,
                &ConsoleObserver,
                &CancelToken::new(),
            )?;
            println!("{completed}/{} converted → {}", files.len(), output.display());
        }
        Command::Inspect { path } => {
            let info = codec::inspect(&path)?;
            println!(
                "{}: {}x{} {} ({}, {} bytes)",
                path.display(),
                info.width,
                info.height,
                info.format,
                info.color_mode,
                info.size_bytes
            );
        }
        Command::Gif(gif) => run_gif(gif, &data_dir)?,
        Command::History { limit } => {
            let store = HistoryStore::open(&data_dir.join("history.db"))?;
            let records = store.recent(limit);
            if records.is_empty() {
                println!("no conversion history");
            }
            for r in records {
                println!(
                    "{}  {:9}  {} → {}  ({} → {} bytes, {} ms)",
                    r.created_at.format("%Y-%m-%d %H:%M:%S"),
                    r.status.as_str(),
                    r.source_path,
                    r.target_path,
                    r.source_size,
                    r.target_size,
                    r.duration_ms
                );
            }
        }
        Command::Stats => {
            let store = HistoryStore::open(&data_dir.join("history.db"))?;
            let stats = store.statistics();
            println!("completed conversions: {}", stats.total_completed);
            println!("bytes saved:           {}", stats.bytes_saved);
            for (format, count) in &stats.by_format {
                println!("  {format}: {count}");
            }
        }
        Command::ClearHistory { yes } => {
            if !yes {
                return Err("pass --yes to confirm deleting all history".into());
            }
            let store = HistoryStore::open(&data_dir.join("history.db"))?;
            let removed = store.clear()?;
            println!("removed {removed} history rows");
        }
        Command::Compact => {
            let store = HistoryStore::open(&data_dir.join("history.db"))?;
            store.compact()?;
            println!("history database compacted");
        }
        Command::Config(ConfigCommand::Show) => {
            let settings = config.load()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Config(ConfigCommand::Set { key, value }) => {
            let current = config.load()?;
            let patch = patch_for(&key, &value)?;
            config.update(&current, patch)?;
            println!("{key} = {value}");
        }
    }

    Ok(())
}

fn run_gif(command: GifCommand, data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = HistoryStore::open(&data_dir.join("history.db"))?;
    let progress = |p: u8| println!("  {p}%");

    match command {
        GifCommand::Create {
            inputs,
            output,
            duration,
            loops,
            quality,
            resize,
        } => {
            let files = expand_inputs(&inputs)?;
            let mut params = GifCreationParams::new()
                .with_frame_duration(duration)?
                .with_loop_count(loops)
                .with_quality(quality);
            if resize.width.is_some() || resize.height.is_some() {
                params = params.with_resize(resize.width, resize.height)?;
            }
            if resize.stretch {
                params = params.with_aspect(AspectMode::Stretch);
            }

            let record = animation::create_from_images(&files, &output, &params, &store, progress)?;
            println!(
                "{} frames → {} ({} bytes)",
                files.len(),
                output.display(),
                record.target_size
            );
        }
        GifCommand::Optimize {
            input,
            output,
            colors,
            no_dither,
            disposal,
        } => {
            let output = output.unwrap_or_else(|| optimized_name(&input));
            let disposal = DisposalMethod::from_code(disposal)
                .ok_or("disposal must be 0, 1, 2 or 3")?;
            let params = GifOptimizationParams::new()
                .with_max_colors(colors)?
                .with_dither(!no_dither)
                .with_disposal(disposal);

            let OptimizeOutcome {
                record,
                reduction_percent,
            } = animation::optimize(&input, &output, &params, &store, progress)?;
            println!(
                "{} → {} ({} → {} bytes, {reduction_percent:.1}% reduction)",
                input.display(),
                output.display(),
                record.source_size,
                record.target_size
            );
        }
        GifCommand::Extract {
            input,
            output,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let written = animation::extract_frames(&input, &output, format, progress)?;
            println!("{} frames → {}", written.len(), output.display());
        }
    }
    Ok(())
}

/// Expand the CLI's mixed file/directory inputs into a flat, sorted file
/// list. Directories are walked recursively; only known image extensions
/// are picked up.
fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| has_image_extension(path))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| INPUT_EXTENSIONS.contains(&ext.as_str()))
}

/// `photo.gif` → `photo_optimized.gif`
fn optimized_name(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}_optimized.gif"))
}

/// Turn a dotted key path and a scalar into the nested JSON fragment the
/// settings deep-merge expects.
fn patch_for(key: &str, value: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let leaf: serde_json::Value = match serde_json::from_str(value) {
        // Bare numbers and booleans parse as themselves
        Ok(v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => v,
        _ => serde_json::Value::String(value.to_string()),
    };

    let mut patch = leaf;
    for part in key.rsplit('.') {
        patch = serde_json::json!({ part: patch });
    }
    Ok(patch)
}
