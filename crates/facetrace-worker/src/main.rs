//! Face-matching video scanner binary.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use facetrace_models::{Effect, FramePolicy, ScanMode, Transition};
use facetrace_worker::{
    exit_code, run_render, RenderOptions, ScanJob, ScanJobResult, ScanRunner, WorkerConfig,
    WorkerError, WorkerResult,
};

#[derive(Parser, Debug)]
#[command(name = "facetrace", version, about = "Find people in videos by their face")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find frames where a known person appears
    Match {
        /// Video file or http(s) URL
        video: String,
        /// Reference photo of the person; repeat for more photos
        #[arg(short, long = "reference", value_name = "IMAGE", required = true)]
        references: Vec<PathBuf>,
        /// Examine every Nth frame
        #[arg(long, value_name = "N")]
        stride: Option<u64>,
        /// Skip the first 10 frames while the decoder settles
        #[arg(long)]
        warmup: bool,
        /// Similarity a face must exceed to match
        #[arg(long, value_name = "SIM")]
        threshold: Option<f32>,
        /// Report the strongest face in a frame instead of the first
        #[arg(long)]
        best_match: bool,
    },

    /// Catalog every distinct person in one or more videos
    Discover {
        /// Video files or http(s) URLs, scanned one after another
        #[arg(required = true)]
        videos: Vec<String>,
        #[arg(long, value_name = "N")]
        stride: Option<u64>,
        #[arg(long)]
        warmup: bool,
        /// Seconds after a new person during which frames are skipped
        #[arg(long, value_name = "SECS")]
        cooldown: Option<f64>,
        /// Similarity above which a face counts as already seen
        #[arg(long, value_name = "SIM")]
        dedup_threshold: Option<f32>,
    },

    /// Cut selected events of a scan into one final video
    Render {
        /// manifest.json written by a scan
        manifest: PathBuf,
        /// Event numbers in playback order; all events when omitted
        #[arg(long, value_delimiter = ',', value_name = "N,N,...")]
        select: Vec<usize>,
        /// fadein, fadeout, mirror_x, mirror_y, blackwhite, invert_colors, resize, speedx, rotate
        #[arg(long)]
        effect: Option<String>,
        /// Effect parameter, e.g. `--param factor=2`
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        /// none or fade
        #[arg(long, default_value = "none")]
        transition: Transition,
        /// Keep the clips' own audio
        #[arg(long)]
        with_audio: bool,
        /// Background music track
        #[arg(long, value_name = "FILE")]
        music: Option<PathBuf>,
        /// Do not burn the timestamp into each clip
        #[arg(long)]
        no_label: bool,
        /// Length of each clip in seconds
        #[arg(long, value_name = "SECS")]
        clip_secs: Option<f64>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["facetrace=info", "ort=warn", "onnxruntime=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn install_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("failed to serve metrics on {}", addr))
}

/// Scans left running after a timeout do not hold the process open longer than this.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::from(exit_code::FAILED);
        }
    };

    let code = runtime.block_on(run(cli));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    info!("Worker shutdown complete");
    ExitCode::from(code)
}

async fn run(cli: Cli) -> u8 {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        if let Err(e) = install_metrics(addr) {
            warn!("{:#}", e);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    match cli.command {
        Commands::Match {
            video,
            references,
            stride,
            warmup,
            threshold,
            best_match,
        } => {
            let mut scan_config = config.scan_config(ScanMode::Targeted).with_warmup(warmup);
            if let Some(stride) = stride {
                scan_config = scan_config.with_stride(stride);
            }
            if let Some(threshold) = threshold {
                scan_config.match_threshold = threshold;
            }
            if best_match {
                scan_config.frame_policy = FramePolicy::BestMatchWins;
            }

            let runner = ScanRunner::new(config, shutdown_rx);
            report_scan(runner.run(ScanJob::targeted(video, references, scan_config)).await)
        }

        Commands::Discover {
            videos,
            stride,
            warmup,
            cooldown,
            dedup_threshold,
        } => {
            let mut scan_config = config.scan_config(ScanMode::Discovery).with_warmup(warmup);
            if let Some(stride) = stride {
                scan_config = scan_config.with_stride(stride);
            }
            if let Some(cooldown) = cooldown {
                scan_config.cooldown_seconds = cooldown;
            }
            if let Some(threshold) = dedup_threshold {
                scan_config.dedup_threshold = threshold;
            }

            let runner = ScanRunner::new(config, shutdown_rx);
            let mut code = exit_code::COMPLETED;
            for video in videos {
                let job = ScanJob::discovery(video, scan_config.clone());
                let video_code = report_scan(runner.run(job).await);
                if video_code == exit_code::CANCELLED {
                    code = video_code;
                    break;
                }
                code = code.max(video_code);
            }
            code
        }

        Commands::Render {
            manifest,
            select,
            effect,
            params,
            transition,
            with_audio,
            music,
            no_label,
            clip_secs,
        } => {
            let params: HashMap<String, String> = params.into_iter().collect();
            let effect = match effect.as_deref() {
                None => None,
                Some(name) => match Effect::from_params(name, &params) {
                    None if !name.eq_ignore_ascii_case("none") => {
                        error!(
                            "Unknown effect '{}'; expected one of {}",
                            name,
                            Effect::NAMES.join(", ")
                        );
                        return exit_code::REJECTED;
                    }
                    effect => effect,
                },
            };

            let mut options = RenderOptions {
                selection: select,
                effect,
                transition,
                with_audio,
                music,
                timestamp_label: !no_label,
                ..Default::default()
            };
            if let Some(secs) = clip_secs {
                options.clip_secs = secs;
            }

            match run_render(&config, &manifest, &options, shutdown_rx).await {
                Ok(path) => {
                    println!("{}", path.display());
                    exit_code::COMPLETED
                }
                Err(e) => report_failure(&e),
            }
        }
    }
}

/// Print the manifest path of a finished scan and map the outcome to an exit code.
fn report_scan(result: WorkerResult<ScanJobResult>) -> u8 {
    match result {
        Ok(done) => {
            info!(
                scan_id = %done.report.scan_id,
                events = done.report.events.len(),
                "Scan written to {}",
                done.artifact_dir.display()
            );
            println!("{}", done.manifest.display());
            exit_code::COMPLETED
        }
        Err(e) => report_failure(&e),
    }
}

fn report_failure(e: &WorkerError) -> u8 {
    if e.is_cancelled() {
        warn!("{}", e);
    } else {
        error!("{}", e);
    }
    e.exit_code()
}
