use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stillreel", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode the images listed in a job JSON file (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Encode images given on the command line (requires `ffmpeg` on PATH).
    Images(ImagesArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input job JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Overrides the job's output directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ImagesArgs {
    /// Output file name (created inside `--out-dir`).
    #[arg(long)]
    out: String,

    /// Output directory; defaults to $STILLREEL_OUTPUT_DIR or the working directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 568)]
    height: u32,

    #[arg(long, default_value_t = 24)]
    fps: u32,

    /// How each image is fitted into the canvas.
    #[arg(long, value_enum, default_value_t = ModeChoice::Fit)]
    mode: ModeChoice,

    /// Frames each image is held for.
    #[arg(long, default_value_t = 1)]
    hold: u32,

    /// Copy the finished video into this directory.
    #[arg(long)]
    library: Option<PathBuf>,

    /// Input images, in display order.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeChoice {
    Fit,
    Fill,
}

impl From<ModeChoice> for stillreel::ContentMode {
    fn from(m: ModeChoice) -> Self {
        match m {
            ModeChoice::Fit => stillreel::ContentMode::Fit,
            ModeChoice::Fill => stillreel::ContentMode::Fill,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Images(args) => cmd_images(args),
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut job = stillreel::ReelJob::from_path(&args.in_path)
        .with_context(|| format!("load job '{}'", args.in_path.display()))?;
    if let Some(dir) = args.out_dir {
        job.session.output_dir = Some(dir);
    }
    run(&job)
}

fn cmd_images(args: ImagesArgs) -> anyhow::Result<()> {
    let canvas = stillreel::CanvasSize::new(args.width, args.height)?;
    let mut session = stillreel::SessionConfig::new(args.out, canvas)
        .with_fps(stillreel::Fps::integer(args.fps)?)
        .with_content_mode(args.mode.into());
    session.output_dir = args.out_dir;

    let job = stillreel::ReelJob {
        session,
        frames: args
            .images
            .into_iter()
            .map(|path| stillreel::FrameSpec {
                path,
                mode: None,
                hold: args.hold,
            })
            .collect(),
        background_rgba: [0, 0, 0, 255],
        library_dir: args.library,
    };
    run(&job)
}

fn run(job: &stillreel::ReelJob) -> anyhow::Result<()> {
    let encoder = stillreel::FfmpegEncoder::new(job.background_rgba);
    let report = stillreel::run_job(job, encoder)?;

    match (report.state, report.output) {
        (stillreel::SessionState::Finalized, Some(path)) => {
            eprintln!(
                "wrote {} ({} frames in {})",
                path.display(),
                report.frames,
                report.elapsed
            );
            Ok(())
        }
        (state, _) => anyhow::bail!(
            "encode ended {state}: {}",
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
