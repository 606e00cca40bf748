use std::{error::Error, path::PathBuf, sync::Arc, thread};

use clap::{ArgAction, CommandFactory, Parser, Subcommand, error::ErrorKind};
use clap_complete::Shell;
use colored::Colorize;
use cutmarks::{
    AnalysisOptions, AnalysisSummary, Analyzer, BackgroundNotifier, CancellationToken,
    CutmarksError, LogNotifier, LogoCorner, LogoExtractionRequest, MarkFormat, OperationType,
    ProgressCallback, ProgressInfo,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{LevelFilter, warn};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  cutmarks /video/Show/2024-01-01.20.15.1-0.rec\n  cutmarks --backupmarks --overlap --progress /video/Show/2024-01-01.20.15.1-0.rec\n  cutmarks -L 1,200,80 -l /tmp/logos /video/Show/2024-01-01.20.15.1-0.rec\n  cutmarks completions bash > cutmarks.bash";

/// Default position of `--loglevel` on the verbosity ladder.
const DEFAULT_LOGLEVEL: u8 = 3;

#[derive(Debug, Parser)]
#[command(
    name = "cutmarks",
    version,
    about = "Detect commercial breaks in broadcast recordings and write cut marks",
    after_help = CLI_AFTER_HELP,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(flatten)]
    analysis: AnalysisArgs,

    /// Recording directory.
    recording: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Parser, Clone, Default)]
struct AnalysisArgs {
    /// Disable analysis: 1 = video decoding, 2 = audio, 3 = both.
    #[arg(short = 'd', long = "disable", value_parser = clap::value_parser!(u8).range(1..=3))]
    disable: Option<u8>,

    /// Ignore info file hints: 1 = audio, 2 = video, 3 = both.
    #[arg(short = 'i', long = "ignoreinfo", value_parser = clap::value_parser!(u8).range(1..=3))]
    ignore_info: Option<u8>,

    /// Directory holding the logo masks.
    #[arg(short = 'l', long = "logocachedir")]
    logo_cache_dir: Option<PathBuf>,

    /// Write edge maps of a corner instead of detecting: corner[,width[,height]].
    #[arg(short = 'L', long = "extractlogo", value_parser = parse_extract_logo)]
    extract_logo: Option<LogoExtractionRequest>,

    /// Directory the extracted edge maps are written to.
    #[arg(long = "extractdir")]
    extract_dir: Option<PathBuf>,

    /// Keep the previous mark file as <markfile>.bak.
    #[arg(short = 'B', long = "backupmarks")]
    backup_marks: bool,

    /// Mark file name inside the recording directory.
    #[arg(long = "markfile")]
    mark_file: Option<String>,

    /// Write frame numbers instead of timecodes.
    #[arg(long)]
    frames: bool,

    /// Seconds recorded before the broadcast starts.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    bstart: Option<u64>,

    /// Seconds recorded after the broadcast ends.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    bstop: Option<u64>,

    /// Log verbosity 0..=10 (0 = off, 3 = info, 10 = trace).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=10))]
    loglevel: Option<u8>,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// FFmpeg log level (quiet, fatal, error, warning, info, debug).
    #[arg(long = "ffmpeg-loglevel")]
    ffmpeg_loglevel: Option<String>,

    /// Do not take the lock file in the recording directory.
    #[arg(long)]
    nopid: bool,

    /// Advise regenerating the index when marks do not match it.
    #[arg(short = 'G', long = "genindex")]
    genindex: bool,

    /// Search for repeated material around every ad block.
    #[arg(long)]
    overlap: bool,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,

    /// Print the marks and the index report as JSON.
    #[arg(long)]
    json: bool,

    /// Write every analyzed picture as PNG into this directory.
    #[arg(long = "dump-frames")]
    dump_frames: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_extract_logo(value: &str) -> Result<LogoExtractionRequest, String> {
    let mut fields = value.split(',').map(str::trim);
    let corner = fields
        .next()
        .and_then(|field| field.parse::<i64>().ok())
        .and_then(LogoCorner::from_index)
        .ok_or_else(|| format!("invalid corner in {value:?}, expected 0..=3"))?;
    let mut dimension = |name: &str, range: std::ops::RangeInclusive<u32>| {
        fields
            .next()
            .filter(|field| !field.is_empty())
            .map(|field| {
                field
                    .parse::<u32>()
                    .ok()
                    .filter(|size| range.contains(size))
                    .ok_or_else(|| {
                        format!("invalid {name} {field:?}, expected {}..={}", range.start(), range.end())
                    })
            })
            .transpose()
    };
    let width = dimension("width", 50..=480)?;
    let height = dimension("height", 20..=200)?;
    Ok(LogoExtractionRequest {
        corner,
        width,
        height,
    })
}

fn level_filter(loglevel: Option<u8>, verbose: u8) -> LevelFilter {
    const LADDER: [LevelFilter; 6] = [
        LevelFilter::Off,
        LevelFilter::Error,
        LevelFilter::Warn,
        LevelFilter::Info,
        LevelFilter::Debug,
        LevelFilter::Trace,
    ];
    let rank = match loglevel.unwrap_or(DEFAULT_LOGLEVEL) {
        level @ 0..=3 => usize::from(level),
        4..=9 => 4,
        _ => 5,
    };
    LADDER[(rank + usize::from(verbose)).min(LADDER.len() - 1)]
}

fn init_logging(args: &AnalysisArgs) {
    env_logger::Builder::new()
        .filter_level(level_filter(args.loglevel, args.verbose))
        .parse_default_env()
        .init();
}

#[cfg(feature = "ffmpeg")]
fn parse_ffmpeg_log_level(value: &str) -> Option<cutmarks::FfmpegLogLevel> {
    use cutmarks::FfmpegLogLevel;
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "debug" => Some(FfmpegLogLevel::Debug),
        _ => None,
    }
}

fn apply_ffmpeg_log_level(args: &AnalysisArgs) -> Result<(), Box<dyn Error>> {
    let Some(level) = &args.ffmpeg_loglevel else {
        return Ok(());
    };
    #[cfg(feature = "ffmpeg")]
    {
        let parsed = parse_ffmpeg_log_level(level).ok_or_else(|| CutmarksError::InvalidOption {
            option: "ffmpeg-loglevel",
            value: level.clone(),
        })?;
        cutmarks::set_ffmpeg_log_level(parsed);
    }
    #[cfg(not(feature = "ffmpeg"))]
    eprintln!(
        "{} {}",
        "warning:".yellow().bold(),
        format!("--ffmpeg-loglevel {level} requires building with the `ffmpeg` feature").yellow()
    );
    Ok(())
}

fn build_options(args: &AnalysisArgs, token: CancellationToken) -> AnalysisOptions {
    let mut options = AnalysisOptions::new()
        .with_cancellation(token)
        .with_backup_marks(args.backup_marks)
        .with_pid_file(!args.nopid)
        .with_regenerate_index(args.genindex)
        .with_overlap_search(args.overlap)
        .with_notifier(Arc::new(BackgroundNotifier::new(LogNotifier)));

    match args.disable {
        Some(1) => options = options.with_video_decoding(false),
        Some(2) => options = options.with_audio_decoding(false),
        Some(3) => {
            options = options
                .with_video_decoding(false)
                .with_audio_decoding(false);
        }
        _ => {}
    }
    match args.ignore_info {
        Some(1) => options = options.with_ignore_audio_info(true),
        Some(2) => options = options.with_ignore_video_info(true),
        Some(3) => {
            options = options
                .with_ignore_audio_info(true)
                .with_ignore_video_info(true);
        }
        _ => {}
    }
    if let Some(directory) = &args.logo_cache_dir {
        options = options.with_logo_directory(directory);
    }
    if let Some(request) = args.extract_logo {
        options = options.with_logo_extraction(request);
    }
    if let Some(directory) = &args.extract_dir {
        options = options.with_extraction_output(directory);
    }
    if let Some(name) = &args.mark_file {
        options = options.with_mark_file(name.clone());
    }
    if args.frames {
        options = options.with_mark_format(MarkFormat::Frames);
    }
    if let Some(secs) = args.bstart {
        options = options.with_pre_roll(secs);
    }
    if let Some(secs) = args.bstop {
        options = options.with_post_roll(secs);
    }
    if let Some(directory) = &args.dump_frames {
        options = options.with_frame_dump(directory);
    }
    if args.progress {
        options = options
            .with_progress(Arc::new(TerminalProgress::new()))
            .with_batch_size(4);
    }
    options
}

// ── Signals ────────────────────────────────────────────────────────

fn install_signal_handler(token: CancellationToken) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if wait_for_signal().await {
                    warn!("termination requested, aborting");
                    token.cancel();
                }
            });
        })?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut interrupt), Ok(mut terminate)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        return false;
    };
    tokio::select! {
        _ = interrupt.recv() => true,
        _ = terminate.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}

// ── Progress ───────────────────────────────────────────────────────

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} {bar:40.cyan/blue} {percent:>3}% {msg} (ETA {eta})",
        ) {
            bar.set_style(style.progress_chars("##-"));
        }
        Self { bar }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(total) = info.total {
            self.bar.set_length(total);
        }
        self.bar.set_position(info.current);
        let stage = match info.operation {
            OperationType::OverlapSearch => "overlap",
            _ => "analysis",
        };
        self.bar
            .set_message(format!("{stage} frame {}", info.current_frame.unwrap_or(0)));
        if info.total.is_some_and(|total| info.current >= total) {
            self.bar.finish_and_clear();
        }
    }
}

// ── Output ─────────────────────────────────────────────────────────

fn print_summary(summary: &AnalysisSummary, json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        let payload = json!({
            "mark_file": summary.mark_file.display().to_string(),
            "frames": summary.frames,
            "fps": summary.frames_per_second,
            "elapsed_seconds": summary.elapsed.as_secs_f64(),
            "index_wait_seconds": summary.index_wait.as_secs_f64(),
            "marks": summary.marks.iter().map(|mark| json!({
                "position": mark.position,
                "type": mark.mark_type.tag(),
                "comment": mark.reason.to_string(),
            })).collect::<Vec<_>>(),
            "report": {
                "valid": summary.report.is_valid(),
                "info": summary.report.info,
                "warnings": summary.report.warnings,
                "errors": summary.report.errors,
            },
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for mark in summary.marks.iter() {
        println!(
            "{:>8} {} {}",
            mark.position,
            mark.mark_type.tag().bold(),
            mark.reason
        );
    }
    for warning in &summary.report.warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), warning.yellow());
    }
    for problem in &summary.report.errors {
        eprintln!("{} {}", "error:".red().bold(), problem);
    }
    println!(
        "{} {} marks written to {}",
        "done".green().bold(),
        summary.marks.len(),
        summary.mark_file.display()
    );
    Ok(())
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "cutmarks", &mut std::io::stdout());
        return Ok(());
    }

    let Some(recording) = cli.recording else {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "a recording directory is required",
            )
            .exit();
    };

    init_logging(&cli.analysis);
    apply_ffmpeg_log_level(&cli.analysis)?;

    let token = CancellationToken::new();
    install_signal_handler(token.clone())?;
    let options = build_options(&cli.analysis, token);

    let mut analyzer = Analyzer::open(&recording, options)?;
    let summary = analyzer.run()?;
    print_summary(&summary, cli.analysis.json)
}

fn main() {
    let code = match run() {
        Ok(()) => 0,
        Err(error) => match error.downcast_ref::<CutmarksError>() {
            Some(CutmarksError::Cancelled) => {
                eprintln!("{}", "aborted".red().bold());
                1
            }
            Some(CutmarksError::InvalidOption { .. }) => {
                eprintln!("error: {error}");
                2
            }
            _ => {
                eprintln!("error: {error}");
                1
            }
        },
    };
    std::process::exit(code);
}
