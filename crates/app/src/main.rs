use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use clipcraft_core::{
    media::raw, AppConfig, ClipCraftError, Command, ExportOutcome, ExportStage, ImageFilter,
    ImagePosition, LoggingConfig, MediaBackend, NoPacer, Pacer, PresentedFrame, Presenter,
    Quality, RawBackend, RealtimePacer, SegmentId, Session,
};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> clipcraft_core::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Synth {
            output,
            frames,
            width,
            height,
            gop,
        } => run_synth(&output, frames, width, height, gop),
        Commands::Info { input } => run_info(&input),
        Commands::Play {
            inputs,
            overlay,
            preview_at,
            realtime,
        } => run_play(config, &inputs, &overlay, preview_at, realtime),
        Commands::Export {
            inputs,
            output,
            quality,
            filter,
            hide,
            overlay,
        } => run_export(config, &inputs, &output, quality, filter, &hide, &overlay),
    }
}

fn run_synth(
    output: &Path,
    frames: usize,
    width: u32,
    height: u32,
    gop: usize,
) -> clipcraft_core::Result<()> {
    let bytes = raw::synthetic_clip(frames, width, height, gop)?;
    std::fs::write(output, &bytes)?;
    tracing::info!(?output, frames, width, height, gop, bytes = bytes.len(), "synthetic clip written");
    Ok(())
}

fn run_info(input: &Path) -> clipcraft_core::Result<()> {
    let bytes = std::fs::read(input)?;
    let media = RawBackend::new().demux(&bytes)?;
    let key_chunks = media.video_chunks.iter().filter(|chunk| chunk.is_key()).count();
    let report = serde_json::json!({
        "video": media.video,
        "duration_ms": media.video.duration_ms(),
        "key_chunks": key_chunks,
        "audio": media.audio.as_ref().map(|(track, _)| track),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_play(
    config: AppConfig,
    inputs: &[PathBuf],
    overlay: &OverlayArgs,
    preview_at: Option<f64>,
    realtime: bool,
) -> clipcraft_core::Result<()> {
    let pacer: Box<dyn Pacer> = if realtime {
        Box::new(RealtimePacer::new())
    } else {
        Box::new(NoPacer)
    };
    let mut session = Session::new(
        config,
        Arc::new(RawBackend::new()),
        Box::new(LogPresenter::default()),
        pacer,
    );
    import_all(&mut session, inputs)?;
    overlay.apply(&mut session)?;

    let (tx, rx) = crossbeam_channel::unbounded();
    if let (Some(timestamp_ms), Some(video)) =
        (preview_at, session.timeline().display_order().first().copied())
    {
        tx.send(Command::SeekPreview {
            video,
            timestamp_ms,
        })
        .map_err(|err| ClipCraftError::msg(err.to_string()))?;
    }
    tx.send(Command::Play)
        .map_err(|err| ClipCraftError::msg(err.to_string()))?;
    drop(tx);

    tracing::info!(
        segments = session.timeline().display_order().len(),
        duration_ms = session.timeline().total_duration_ms(),
        "playing timeline"
    );
    session.run(&rx)?;

    for diagnostic in session.engine_mut().take_diagnostics() {
        tracing::warn!(segment = %diagnostic.segment, chunk = diagnostic.chunk, "{}", diagnostic.message);
    }
    Ok(())
}

fn run_export(
    config: AppConfig,
    inputs: &[PathBuf],
    output: &Path,
    quality: Option<Quality>,
    filter: Option<ImageFilter>,
    hide: &[usize],
    overlay: &OverlayArgs,
) -> clipcraft_core::Result<()> {
    let quality = quality.unwrap_or(config.export.default_quality);
    let mut session = Session::new(
        config,
        Arc::new(RawBackend::new()),
        Box::new(LogPresenter::default()),
        Box::new(NoPacer),
    );
    let ids = import_all(&mut session, inputs)?;
    overlay.apply(&mut session)?;

    if let Some(filter) = filter {
        for video in &ids {
            session.dispatch(Command::ChangeFilter {
                video: *video,
                filter,
            })?;
        }
    }
    for index in hide {
        let video = *ids
            .get(*index)
            .ok_or(ClipCraftError::InvalidInput("--hide index is out of range"))?;
        session.dispatch(Command::ToggleVisibility { video })?;
    }

    let outcome = session.export_with_progress(quality, |progress| match progress.stage {
        ExportStage::Rendering => tracing::debug!(
            encoded = progress.frames_encoded,
            total = progress.total_frames,
            "rendering"
        ),
        stage => tracing::info!(?stage, total = progress.total_frames, "export progress"),
    })?;

    match outcome {
        ExportOutcome::Empty => tracing::warn!("no visible segments, nothing written"),
        ExportOutcome::Finished(artifact) => {
            std::fs::write(output, &artifact.buffer)?;
            tracing::info!(
                ?output,
                %quality,
                frames = artifact.frame_count,
                duration_us = artifact.duration_us,
                "export written"
            );
        }
    }
    Ok(())
}

fn import_all(session: &mut Session, inputs: &[PathBuf]) -> clipcraft_core::Result<Vec<SegmentId>> {
    inputs
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)?;
            session.import(&bytes)
        })
        .collect()
}

/// Logs every frame the engine presents.
#[derive(Debug, Default)]
struct LogPresenter {
    presented: usize,
}

impl Presenter for LogPresenter {
    fn present(&mut self, frame: PresentedFrame) {
        self.presented += 1;
        tracing::info!(
            segment = %frame.segment,
            timestamp_us = frame.timestamp_us,
            count = self.presented,
            "frame presented"
        );
    }

    fn clear(&mut self) {
        tracing::info!("surface cleared");
    }
}

fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    if config.json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless Clip Craft video editor", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct OverlayArgs {
    /// Image drawn over the first clip.
    #[arg(long)]
    overlay: Option<PathBuf>,
    /// Anchor of the overlay image.
    #[arg(long, default_value_t = ImagePosition::Center)]
    overlay_position: ImagePosition,
}

impl OverlayArgs {
    fn apply(&self, session: &mut Session) -> clipcraft_core::Result<()> {
        let Some(path) = &self.overlay else {
            return Ok(());
        };
        let Some(video) = session.timeline().display_order().first().copied() else {
            return Ok(());
        };
        let image = image::open(path)?.to_rgba8();
        session.dispatch(Command::AddImage {
            video,
            image,
            position: self.overlay_position,
        })
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a synthetic raw clip for experiments.
    Synth {
        output: PathBuf,
        #[arg(long, default_value_t = 90)]
        frames: usize,
        #[arg(long, default_value_t = 320)]
        width: u32,
        #[arg(long, default_value_t = 180)]
        height: u32,
        /// Distance between key chunks.
        #[arg(long, default_value_t = 30)]
        gop: usize,
    },
    /// Print the track information of a clip as JSON.
    Info { input: PathBuf },
    /// Play clips back to back without a window, logging each frame.
    Play {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        overlay: OverlayArgs,
        /// Show the frame at this offset (ms) of the first clip before playing.
        #[arg(long)]
        preview_at: Option<f64>,
        /// Throttle playback to the configured frame rate.
        #[arg(long)]
        realtime: bool,
    },
    /// Render the visible clips into a single file.
    Export {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        /// 1080p, 720p or 480p. Defaults to the configured quality.
        #[arg(short, long)]
        quality: Option<Quality>,
        /// Filter applied to every clip.
        #[arg(long)]
        filter: Option<ImageFilter>,
        /// Zero-based index of a clip to hide. May be repeated.
        #[arg(long)]
        hide: Vec<usize>,
        #[command(flatten)]
        overlay: OverlayArgs,
    },
}
