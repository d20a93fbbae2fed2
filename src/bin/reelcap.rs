use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use reelcap::{
    CaptureFilter, FfmpegWriter, FfmpegWriterOpts, Fps, Rect, RecordingConfig, RecordingSession,
    SyntheticSource, SyntheticSourceOpts,
};

#[derive(Parser, Debug)]
#[command(name = "reelcap", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record the synthetic test source to an MP4 (requires `ffmpeg` on PATH).
    Record(RecordArgs),
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Recording configuration JSON; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Capture size as WIDTHxHEIGHT.
    #[arg(long)]
    size: Option<String>,

    /// Frames per second.
    #[arg(long)]
    fps: Option<u32>,

    /// Seconds to record.
    #[arg(long, default_value_t = 5.0)]
    duration: f64,

    /// Crop rectangle as X,Y,WIDTH,HEIGHT in source pixels.
    #[arg(long)]
    crop: Option<String>,

    /// Output MP4 path (default: timestamped file in the downloads directory).
    #[arg(long)]
    out: Option<PathBuf>,

    /// Log the frame path at debug level.
    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Record(args) => cmd_record(args),
    }
}

fn cmd_record(args: RecordArgs) -> anyhow::Result<()> {
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if !args.duration.is_finite() || args.duration <= 0.0 {
        anyhow::bail!("duration must be a positive number of seconds");
    }

    let mut config = match &args.config {
        Some(path) => read_config_json(path)?,
        None => RecordingConfig::default(),
    };
    if let Some(size) = &args.size {
        let (width, height) = parse_size(size)?;
        config.width = width;
        config.height = height;
    }
    if let Some(fps) = args.fps {
        config.fps = Fps::new(fps, 1)?;
    }
    if let Some(out) = &args.out {
        config.output_path = Some(out.clone());
    }
    config.validate()?;

    let crop = args.crop.as_deref().map(parse_crop).transpose()?;

    let source = SyntheticSource::new(SyntheticSourceOpts::default());
    let writer = FfmpegWriter::new(FfmpegWriterOpts::default());
    let mut session = RecordingSession::new(source, Box::new(writer), config);

    session.start(&CaptureFilter::default(), crop)?;
    std::thread::sleep(std::time::Duration::from_secs_f64(args.duration));
    let handle = session.stop()?;

    let stats = session.stats();
    eprintln!(
        "wrote {} ({} frames encoded, {} delivered, {} dropped)",
        handle.path.display(),
        stats.accepted,
        stats.delivered,
        stats.dropped_total(),
    );
    Ok(())
}

fn read_config_json(path: &Path) -> anyhow::Result<RecordingConfig> {
    let f = File::open(path).with_context(|| format!("open config '{}'", path.display()))?;
    let r = BufReader::new(f);
    let config: RecordingConfig =
        serde_json::from_reader(r).with_context(|| "parse recording config JSON")?;
    Ok(config)
}

fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .with_context(|| format!("size '{s}' is not WIDTHxHEIGHT"))?;
    let width = w
        .trim()
        .parse()
        .with_context(|| format!("bad width in size '{s}'"))?;
    let height = h
        .trim()
        .parse()
        .with_context(|| format!("bad height in size '{s}'"))?;
    Ok((width, height))
}

fn parse_crop(s: &str) -> anyhow::Result<Rect> {
    let parts = s
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<f64>()
                .with_context(|| format!("bad crop number '{}'", p.trim()))
        })
        .collect::<anyhow::Result<Vec<f64>>>()?;
    let &[x, y, w, h] = parts.as_slice() else {
        anyhow::bail!("crop '{s}' is not X,Y,WIDTH,HEIGHT");
    };
    Ok(Rect::from_origin_size((x, y), (w, h)))
}
