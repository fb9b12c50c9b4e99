use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "emojigrid", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the tile plan for a source size as JSON.
    Plan(PlanArgs),
    /// Cut a media file into rendered tiles (requires `ffmpeg`/`ffprobe` on PATH).
    Render(RenderArgs),
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Source width in pixels.
    #[arg(long)]
    width: u32,

    /// Source height in pixels.
    #[arg(long)]
    height: u32,

    /// Grid width in tiles (1..=8); 0 keeps the source width.
    #[arg(long, default_value_t = 0)]
    columns: u32,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input video, GIF or image.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output directory for the tiles.
    #[arg(long)]
    out: PathBuf,

    /// Grid width in tiles (1..=8); 0 keeps the source width.
    #[arg(long, default_value_t = 0)]
    columns: u32,

    /// Background colour to key out (name or 0xRRGGBB).
    #[arg(long)]
    background: Option<String>,

    /// Colour-key similarity.
    #[arg(long)]
    similarity: Option<String>,

    /// Colour-key blend.
    #[arg(long)]
    blend: Option<String>,

    /// Quality level; each step raises the encoder CRF.
    #[arg(long, default_value_t = 0)]
    quality: u32,

    /// Engine config JSON.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Plan(args) => cmd_plan(args),
        Command::Render(args) => cmd_render(args),
    }
}

fn cmd_plan(args: PlanArgs) -> anyhow::Result<()> {
    let plan = emojigrid::plan_tiles(args.width, args.height, args.columns)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&plan).context("serialize tile plan")?
    );
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let cfg = match &args.config {
        Some(path) => emojigrid::EngineConfig::from_json_file(path)?,
        None => emojigrid::EngineConfig::default(),
    };

    let background = emojigrid::BackgroundKey::resolve(
        args.background.as_deref(),
        args.similarity.as_deref(),
        args.blend.as_deref(),
        &cfg,
    )?;

    let dims = emojigrid::probe_dimensions(&args.in_path, &cfg.ffprobe_bin)?;
    let plan = emojigrid::plan_tiles(dims.width, dims.height, args.columns)?;

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("create output dir '{}'", args.out.display()))?;

    let transcoder = Arc::new(emojigrid::FfmpegTranscoder::new(cfg.ffmpeg_bin.clone()));
    let renderer = emojigrid::TileRenderer::new(cfg.workers, transcoder)?;
    let opts = emojigrid::RenderOptions::new(&cfg, background, args.quality);

    let resized = args.out.join(emojigrid::pipeline::RESIZED_FILE_NAME);
    renderer
        .transcoder()
        .resize_source(&args.in_path, &resized, plan.width, plan.height)?;

    let tiles = renderer.render(&plan, &resized, &args.out, &opts)?;
    if plan.transparent_spacing() > 0 {
        renderer
            .transcoder()
            .render_filler(&args.out.join(emojigrid::upload::FILLER_FILE_NAME), &opts)?;
    }

    eprintln!(
        "wrote {} tiles ({}x{} grid, crf {}) to {}",
        tiles.len(),
        plan.tiles_x,
        plan.tiles_y,
        opts.crf,
        args.out.display()
    );
    Ok(())
}
