//! Command-line entry point: process one URL or sweep the pending source,
//! then print the JSON result on stdout.
use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tracing::error;

use wandr_worker::{
    app::build_pipeline,
    config::Config,
    observability::Telemetry,
    pipeline::{RunMode, RunOptions},
};

#[derive(Debug, Parser)]
#[command(name = "wandr", version, about = "Extract places from short-form video URLs")]
#[command(group(ArgGroup::new("input").required(true).args(["url", "process_pending_urls"])))]
#[command(group(ArgGroup::new("mode").args(["video_only", "location_only"])))]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// URL of the video or photo post to process.
    #[arg(long)]
    url: Option<String>,

    /// Expected place category, forwarded to analysis. Repeatable.
    #[arg(long = "category", value_name = "CATEGORY")]
    categories: Vec<String>,

    /// Directory for downloaded media and JSON artifacts.
    #[arg(long, env = "WANDR_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Seconds between sampled frames.
    #[arg(long)]
    frame_interval: Option<f64>,

    /// Upper bound on sampled frames per video.
    #[arg(long)]
    max_frames: Option<usize>,

    /// Stop after combining text.
    #[arg(long)]
    video_only: bool,

    /// Redo location extraction from the cached video result.
    #[arg(long)]
    location_only: bool,

    #[arg(long)]
    skip_ocr: bool,

    #[arg(long)]
    skip_transcription: bool,

    /// Append the post caption to the analysed text.
    #[arg(long)]
    include_caption: bool,

    #[arg(long)]
    no_persist: bool,

    /// Ignore cached artifacts.
    #[arg(long)]
    no_cache: bool,

    /// Process every pending URL from the source database.
    #[arg(long)]
    process_pending_urls: bool,
}

impl Cli {
    fn options(&self) -> RunOptions {
        let mode = if self.video_only {
            RunMode::VideoOnly
        } else if self.location_only {
            RunMode::LocationOnly
        } else {
            RunMode::Full
        };
        RunOptions {
            mode,
            skip_transcription: self.skip_transcription,
            skip_ocr: self.skip_ocr,
            include_caption: self.include_caption,
            persist: !self.no_persist,
            use_cache: !self.no_cache,
            categories: self.categories.clone(),
        }
    }

    fn config(&self) -> anyhow::Result<Config> {
        let mut config = Config::from_env().context("failed to load configuration")?;
        if let Some(dir) = &self.output_dir {
            config = config.with_output_dir(dir);
        }
        Ok(config.with_frame_sampling(self.frame_interval, self.max_frames))
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = cli.config()?;
    let telemetry = Telemetry::new().context("failed to initialise telemetry")?;
    let pipeline = build_pipeline(&config, &telemetry)?;
    let options = cli.options();

    let (json, succeeded) = if cli.process_pending_urls {
        let report = pipeline.run_pending(&options).await;
        (serde_json::to_string_pretty(&report)?, report.all_succeeded())
    } else {
        let url = cli.url.as_deref().unwrap_or_default();
        let result = pipeline.run_one(url, &options).await;
        (serde_json::to_string_pretty(&result)?, result.succeeded())
    };
    println!("{json}");
    Ok(succeeded)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            error!(error = ?error, "wandr failed");
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
