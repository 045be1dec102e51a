use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand};
use framecast_core::{
    chunk, AppConfig, CodeFamily, FramecastError, FrameView, PixelBuffer, PlaybackState, Player,
    SymbolRenderer,
};
use tracing_subscriber::EnvFilter;

fn main() -> framecast_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Chunk { input, chunk_size } => {
            if let Some(chunk_size) = chunk_size {
                config.stream.chunk_size = chunk_size;
            }
            config.validate()?;
            run_chunk(input.as_deref(), &config)
        }
        Commands::Play(args) => {
            args.apply_to(&mut config);
            config.validate()?;
            run_play(&args, &config)
        }
        Commands::Config => {
            config.validate()?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn run_chunk(input: Option<&Path>, config: &AppConfig) -> framecast_core::Result<()> {
    let text = read_input(input)?;
    let set = chunk(&text, config.stream.chunk_size)?;
    tracing::info!(
        stream = ?set.stream_id.as_ref().map(|id| id.as_str()),
        total = set.len(),
        "chunked input"
    );

    let mut stdout = io::stdout().lock();
    for envelope in &set.envelopes {
        writeln!(stdout, "{}", envelope.to_payload()?)?;
    }
    Ok(())
}

fn run_play(args: &PlayArgs, config: &AppConfig) -> framecast_core::Result<()> {
    let text = read_input(args.input.as_deref())?;
    if let Some(dir) = &args.out_dir {
        std::fs::create_dir_all(dir)?;
    }
    tracing::info!(
        family = %config.render.family,
        frame_rate = config.stream.frame_rate,
        loop_playback = config.stream.loop_playback,
        "starting playback"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(play(text, args, config))
}

async fn play(text: String, args: &PlayArgs, config: &AppConfig) -> framecast_core::Result<()> {
    let player = Player::spawn(
        text,
        config.stream.chunk_size,
        config.stream.playback_settings(),
    )?;
    let mut frames = player.subscribe();
    let mut sink = FrameSink::new(args.out_dir.clone(), config)?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let snapshot = frames.borrow_and_update().clone();
        let view = sink.renderer.render_frame(&snapshot, config.render.family);
        sink.present(&view, &snapshot.status_line())?;

        if snapshot.state != PlaybackState::Running {
            break;
        }
        if args.max_frames.is_some_and(|max| sink.presented >= max) {
            break;
        }

        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted");
                break;
            }
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    player.shutdown().await;
    tracing::info!(frames = sink.presented, "playback finished");
    Ok(())
}

/// Where rendered frames go: PNG files or the terminal.
struct FrameSink {
    renderer: SymbolRenderer,
    out_dir: Option<PathBuf>,
    presented: usize,
    last_seq: Option<usize>,
}

impl FrameSink {
    fn new(out_dir: Option<PathBuf>, config: &AppConfig) -> framecast_core::Result<Self> {
        // The terminal shows one character cell per module pair.
        let target_size = if out_dir.is_some() {
            config.render.target_size
        } else {
            1
        };
        Ok(Self {
            renderer: SymbolRenderer::new(target_size)?,
            out_dir,
            presented: 0,
            last_seq: None,
        })
    }

    fn present(&mut self, view: &FrameView, status: &str) -> framecast_core::Result<()> {
        self.presented += 1;
        if let FrameView::Ready { seq, total, .. } = view {
            let dropped = dropped_envelopes(self.last_seq, *seq, *total);
            if dropped > 0 {
                tracing::warn!(dropped, seq, "rendering fell behind, envelopes were not shown");
            }
            self.last_seq = Some(*seq);
        }
        match (&self.out_dir, view) {
            (Some(dir), FrameView::Ready { seq, .. }) => {
                let path = dir.join(frame_file_name(*seq));
                write_png(self.renderer.canvas(), &path)?;
                tracing::info!(path = %path.display(), status, "frame written");
            }
            (Some(_), _) => tracing::info!(status, ?view, "frame not written"),
            (None, FrameView::Ready { .. }) => {
                let mut stdout = io::stdout().lock();
                write!(stdout, "\x1b[2J\x1b[H{}", terminal_preview(self.renderer.canvas()))?;
                writeln!(stdout, "{status}")?;
                stdout.flush()?;
            }
            (None, FrameView::Empty) => println!("{status}"),
            (None, FrameView::Unparseable) => println!("cannot parse chunk ({status})"),
            (None, FrameView::Skipped) => println!("symbol could not be encoded ({status})"),
        }
        Ok(())
    }
}

fn frame_file_name(seq: usize) -> String {
    format!("frame-{seq:05}.png")
}

/// Envelopes skipped between two presented frames, accounting for wrap-around.
fn dropped_envelopes(last: Option<usize>, seq: usize, total: usize) -> usize {
    match last {
        Some(last) if last < total && seq < total && seq != last => (seq + total - last - 1) % total,
        _ => 0,
    }
}

fn write_png(canvas: &PixelBuffer, path: &Path) -> framecast_core::Result<()> {
    let image = image::GrayImage::from_raw(
        canvas.width() as u32,
        canvas.height() as u32,
        canvas.pixels().to_vec(),
    )
    .ok_or_else(|| FramecastError::Image("canvas size does not match its pixels".into()))?;
    image
        .save(path)
        .map_err(|err| FramecastError::Image(err.to_string()))
}

const QUIET_ZONE: usize = 2;

/// Draws the canvas with half-block characters, two pixel rows per line.
/// Light pixels are printed, dark ones left blank, which suits dark terminals.
fn terminal_preview(canvas: &PixelBuffer) -> String {
    let light = |x: usize, y: usize| -> bool {
        if x < QUIET_ZONE || y < QUIET_ZONE {
            return true;
        }
        canvas
            .pixel(x - QUIET_ZONE, y - QUIET_ZONE)
            .map_or(true, |pixel| pixel > 127)
    };

    let width = canvas.width() + 2 * QUIET_ZONE;
    let height = canvas.height() + 2 * QUIET_ZONE;
    let mut out = String::new();
    for y in (0..height).step_by(2) {
        for x in 0..width {
            out.push(match (light(x, y), y + 1 < height && light(x, y + 1)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    out
}

fn read_input(input: Option<&Path>) -> framecast_core::Result<String> {
    match input {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        _ => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream text as an animated barcode", long_about = None)]
struct Cli {
    /// TOML configuration file; command line flags take precedence.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Split the input into envelopes and print one JSON payload per line.
    Chunk {
        /// Input file, or `-` / nothing for stdin.
        input: Option<PathBuf>,
        /// Characters per envelope.
        #[arg(short = 's', long)]
        chunk_size: Option<usize>,
    },
    /// Play the input as a sequence of optical codes.
    Play(PlayArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(Args, Debug)]
struct PlayArgs {
    /// Input file, or `-` / nothing for stdin.
    input: Option<PathBuf>,
    /// Characters per envelope.
    #[arg(short = 's', long)]
    chunk_size: Option<usize>,
    /// Frames per second.
    #[arg(short, long)]
    fps: Option<u32>,
    /// Stop after the last envelope instead of looping.
    #[arg(long)]
    once: bool,
    /// Code family: qr, aztec or datamatrix.
    #[arg(long)]
    family: Option<CodeFamily>,
    /// Target symbol size in pixels for PNG output.
    #[arg(long)]
    size: Option<usize>,
    /// Write PNG frames into this directory instead of drawing in the terminal.
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
    /// Stop after this many frames.
    #[arg(short, long)]
    max_frames: Option<usize>,
}

impl PlayArgs {
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(chunk_size) = self.chunk_size {
            config.stream.chunk_size = chunk_size;
        }
        if let Some(fps) = self.fps {
            config.stream.frame_rate = fps;
        }
        if self.once {
            config.stream.loop_playback = false;
        }
        if let Some(family) = self.family {
            config.render.family = family;
        }
        if let Some(size) = self.size {
            config.render.target_size = size;
        }
    }
}
