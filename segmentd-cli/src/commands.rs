//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgGroup, Args, Subcommand};
use segmentd_core::config::SegmentdConfig;
use segmentd_core::transcoding::{
    CoordinatorError, FfmpegSegmentProducer, ProducerError, ServedSegment, TranscodeCoordinator,
    TranscodeOptions, WindowPolicy,
};
use segmentd_core::{Result, SegmentdError};
use tokio_util::sync::CancellationToken;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show the window a miss on one segment schedules
    Plan {
        /// Number of segments in the input
        #[arg(long)]
        total: usize,
        /// Requested segment
        #[arg(long)]
        index: usize,
        /// Segments scheduled behind the request
        #[arg(long)]
        buffer_min: Option<usize>,
        /// Segments scheduled ahead of the window start beyond the minimum
        #[arg(long)]
        buffer_max: Option<usize>,
    },
    /// Produce segments of an input with ffmpeg and print their paths
    Serve(ServeArgs),
}

/// Arguments of the `serve` command
#[derive(Args)]
#[command(group(ArgGroup::new("source").required(true).args(["options", "input"])))]
pub struct ServeArgs {
    /// JSON file with complete transcode options
    #[arg(long)]
    pub options: Option<PathBuf>,

    /// Input media file, split into uniform segments
    #[arg(long, requires_all = ["output_dir", "duration"])]
    pub input: Option<PathBuf>,

    /// Directory segments are written to
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Input duration in seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Segment length in seconds
    #[arg(long, default_value_t = 6.0)]
    pub segment_length: f64,

    /// Artifact name prefix
    #[arg(long, default_value = "segment")]
    pub prefix: String,

    /// Copy streams instead of re-encoding
    #[arg(long)]
    pub copy: bool,

    /// Segments to serve, in request order
    #[arg(long = "index", required = true, num_args = 1..)]
    pub indices: Vec<usize>,

    /// Request all segments at once instead of one after another
    #[arg(long)]
    pub concurrent: bool,

    /// Delete produced segments before exiting
    #[arg(long)]
    pub cleanup: bool,
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Plan {
            total,
            index,
            buffer_min,
            buffer_max,
        } => print_plan(total, index, buffer_min, buffer_max),
        Commands::Serve(args) => serve_segments(args).await,
    }
}

/// Print the window scheduled by a miss on `index`
fn print_plan(
    total: usize,
    index: usize,
    buffer_min: Option<usize>,
    buffer_max: Option<usize>,
) -> Result<()> {
    let policy = resolve_policy(buffer_min, buffer_max);
    if index >= total {
        return Err(CoordinatorError::InvalidIndex { index, total }.into());
    }

    let window = policy.plan(index, total);
    println!(
        "Segment {index} of {total} (buffer_min={}, buffer_max={})",
        policy.buffer_min, policy.buffer_max
    );
    println!(
        "  Window: {}..{} ({} segments)",
        window.start,
        window.end,
        window.len()
    );

    Ok(())
}

fn resolve_policy(buffer_min: Option<usize>, buffer_max: Option<usize>) -> WindowPolicy {
    let defaults = SegmentdConfig::from_env().coordinator;
    WindowPolicy::new(
        buffer_min.unwrap_or(defaults.segment_buffer_min),
        buffer_max.unwrap_or(defaults.segment_buffer_max),
    )
}

/// Produce the requested segments through a coordinator
async fn serve_segments(args: ServeArgs) -> Result<()> {
    let config = SegmentdConfig::from_env();
    config
        .coordinator
        .validate()
        .map_err(|reason| SegmentdError::Configuration { reason })?;

    let options = load_options(&args).await?;
    options.validate()?;

    let producer = FfmpegSegmentProducer::new(&config.producer);
    if !producer.is_available().await {
        return Err(ProducerError::SpawnFailed {
            reason: format!("{} is not runnable", config.producer.ffmpeg_path.display()),
        }
        .into());
    }

    println!(
        "Serving {} of {} segments from {}",
        args.indices.len(),
        options.total_segments(),
        options.input_path.display()
    );

    let coordinator = TranscodeCoordinator::new(options, config.coordinator, Arc::new(producer))?;
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling outstanding requests");
                cancel.cancel();
            }
        })
    };

    let result = run_requests(&coordinator, &args, &cancel).await;
    interrupt.abort();

    let stats = coordinator.statistics();
    println!(
        "Produced {} segments in {} windows ({} failures, hit rate {:.1}%)",
        stats.segments_produced, stats.windows_started, stats.production_failures, stats.hit_rate
    );

    if args.cleanup {
        let report = coordinator.clear_segments().await;
        println!("Removed {} segment files", report.files_removed);
    }

    result
}

async fn run_requests(
    coordinator: &TranscodeCoordinator,
    args: &ServeArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    coordinator.initialize(cancel).await?;

    if args.concurrent {
        let requests = args
            .indices
            .iter()
            .map(|&index| coordinator.serve_segment(index, cancel));
        for served in futures::future::join_all(requests).await {
            print_served(&served?);
        }
    } else {
        for &index in &args.indices {
            let served = coordinator.serve_segment(index, cancel).await?;
            print_served(&served);
        }
    }

    Ok(())
}

fn print_served(served: &ServedSegment) {
    println!("{:>5}  {}", served.index, served.path.display());
}

/// Build transcode options from an options file or from uniform segmentation
async fn load_options(args: &ServeArgs) -> Result<TranscodeOptions> {
    let mut options = match (&args.options, &args.input) {
        (Some(path), _) => read_options_file(path).await?,
        (None, Some(input)) => {
            let output_dir = args
                .output_dir
                .clone()
                .ok_or_else(|| missing_argument("--output-dir"))?;
            let duration = args.duration.ok_or_else(|| missing_argument("--duration"))?;
            TranscodeOptions::with_uniform_segments(
                input,
                output_dir,
                args.prefix.as_str(),
                duration,
                args.segment_length,
            )?
        }
        (None, None) => return Err(missing_argument("--options or --input")),
    };

    if args.copy {
        options.direct_play = true;
    }

    Ok(options)
}

async fn read_options_file(path: &Path) -> Result<TranscodeOptions> {
    let text = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&text).map_err(|e| SegmentdError::Configuration {
        reason: format!("invalid options file {}: {e}", path.display()),
    })
}

fn missing_argument(name: &str) -> SegmentdError {
    SegmentdError::Configuration {
        reason: format!("{name} is required"),
    }
}
