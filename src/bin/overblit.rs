use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

use overblit::{
    BlitJobEngine, BufferAllocator, BufferQueueConfig, CompositionOrchestrator, CompositorConfig,
    DiagRing, LayerFrame, LinearResolver, OverlayInput, PixelFormat, Rect, SchedulingHints,
    SourceBuffer, SystemAllocator, Transform, fence,
};

#[derive(Parser, Debug)]
#[command(name = "overblit", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run synthetic frames through the full pipeline against the software
    /// engines and print stats as JSON.
    Soak(SoakArgs),
    /// Compose a single synthetic frame and dump the published overlay inputs.
    Frame(FrameArgs),
}

#[derive(Parser, Debug)]
struct SoakArgs {
    /// Number of frames to compose.
    #[arg(long, default_value_t = 1000)]
    frames: u64,

    /// Layers per frame.
    #[arg(long, default_value_t = 2)]
    layers: u64,

    /// Output buffer width.
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Output buffer height.
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Output pixel format.
    #[arg(long, value_enum, default_value_t = FormatChoice::Rgba8888)]
    format: FormatChoice,

    /// Route layers through the direct engine path.
    #[arg(long)]
    direct: bool,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Output buffer width.
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Output buffer height.
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Output pixel format.
    #[arg(long, value_enum, default_value_t = FormatChoice::Rgba8888)]
    format: FormatChoice,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Rgba8888,
    Rgb565,
    Yuyv,
    Nv12,
}

impl From<FormatChoice> for PixelFormat {
    fn from(choice: FormatChoice) -> Self {
        match choice {
            FormatChoice::Rgba8888 => PixelFormat::Rgba8888,
            FormatChoice::Rgb565 => PixelFormat::Rgb565,
            FormatChoice::Yuyv => PixelFormat::Yuyv,
            FormatChoice::Nv12 => PixelFormat::Nv12,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Soak(args) => cmd_soak(args),
        Command::Frame(args) => cmd_frame(args),
    }
}

struct Rig {
    orchestrator: CompositionOrchestrator,
    allocator: Arc<SystemAllocator>,
    engine: Arc<BlitJobEngine>,
}

fn build_rig(width: u32, height: u32, format: PixelFormat) -> anyhow::Result<Rig> {
    let config = Arc::new(CompositorConfig::default());
    let diag = Arc::new(DiagRing::new(config.diag_ring_capacity));
    let engine = Arc::new(BlitJobEngine::with_software_backends(
        Arc::clone(&config),
        Arc::clone(&diag),
    ));
    let allocator = Arc::new(SystemAllocator::new());
    let orchestrator = CompositionOrchestrator::new(
        0,
        config,
        BufferQueueConfig::new(width, height, format),
        Arc::clone(&engine),
        Arc::clone(&allocator) as Arc<dyn BufferAllocator>,
        Box::new(LinearResolver),
        diag,
    );
    Ok(Rig {
        orchestrator,
        allocator,
        engine,
    })
}

fn synth_sources(
    rig: &Rig,
    count: u64,
    width: u32,
    height: u32,
) -> anyhow::Result<Vec<Arc<overblit::BufferHandle>>> {
    (0..count)
        .map(|_| {
            rig.allocator
                .allocate(
                    &BufferQueueConfig::new(width, height, PixelFormat::Rgba8888),
                    false,
                )
                .map_err(|e| anyhow::anyhow!("allocate synthetic source buffer: {e}"))
        })
        .collect()
}

fn synth_layers(
    sources: &[Arc<overblit::BufferHandle>],
    direct: bool,
) -> anyhow::Result<Vec<LayerFrame>> {
    let mut layers = Vec::with_capacity(sources.len());
    for (i, source) in sources.iter().enumerate() {
        let extent = Rect::new(0, 0, source.width as i32, source.height as i32);
        layers.push(LayerFrame {
            key: i as u64,
            source: SourceBuffer {
                fd: source.raw_fd(),
                secure_handle: None,
                width: source.width,
                height: source.height,
                format: source.format,
                interlaced: false,
            },
            src_crop: extent,
            dst_crop: extent,
            transform: Transform::IDENTITY,
            dirty: true,
            skippable: false,
            direct_link: direct,
            secure: false,
            sharpen: false,
            hdr: None,
            acquire_fence: Some(fence::signalled_fence().context("create acquire fence")?),
        });
    }
    Ok(layers)
}

fn drain_queue(rig: &Rig) -> anyhow::Result<()> {
    // Stand in for the overlay stage: consume whatever was queued and hand the
    // slots back.
    while let Ok(buf) = rig.orchestrator.queue().acquire_buffer(true) {
        if let Some(f) = &buf.acquire_fence {
            f.wait().context("wait blit completion")?;
        }
        let index = buf.index;
        drop(buf);
        rig.orchestrator
            .queue()
            .release_buffer(index, Some(fence::signalled_fence()?))
            .map_err(|e| anyhow::anyhow!("release: {e}"))?;
    }
    Ok(())
}

fn cmd_soak(args: SoakArgs) -> anyhow::Result<()> {
    let mut rig = build_rig(args.width, args.height, args.format.into())?;
    let sources = synth_sources(&rig, args.layers, args.width, args.height)?;

    for frame in 0..args.frames {
        let mut layers = synth_layers(&sources, args.direct)?;
        // Alternate dirtiness so the skip path and the fence side table get
        // exercised too.
        if frame % 4 == 3 {
            for layer in &mut layers {
                layer.dirty = false;
                layer.skippable = true;
            }
        }
        let inputs = rig
            .orchestrator
            .compose_frame(layers, SchedulingHints::default())
            .map_err(|e| anyhow::anyhow!("compose frame {frame}: {e}"))?;
        drop(inputs);
        drain_queue(&rig)?;
    }

    let report = serde_json::json!({
        "frames": args.frames,
        "orchestrator": rig.orchestrator.stats(),
        "queue": rig.orchestrator.queue().stats(),
        "engine": rig.engine.stats(),
        "stream_backend": rig.engine.backend_stats(overblit::EngineKind::Stream),
        "direct_backend": rig.engine.backend_stats(overblit::EngineKind::Direct),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn describe(input: &OverlayInput) -> serde_json::Value {
    serde_json::json!({
        "layer_key": input.layer_key,
        "buffer_fd": input.buffer_fd,
        "width": input.width,
        "height": input.height,
        "format": format!("{:?}", input.format),
        "pitch": input.pitch,
        "crop": input.crop,
        "dst": input.dst,
        "blitted": input.blitted,
        "fence_signalled": input.fence.as_ref().map(|f| f.is_signalled()),
    })
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let mut rig = build_rig(args.width, args.height, args.format.into())?;
    let sources = synth_sources(&rig, 2, args.width, args.height)?;
    let layers = synth_layers(&sources, false)?;
    let inputs = rig
        .orchestrator
        .compose_frame(layers, SchedulingHints::default())
        .map_err(|e| anyhow::anyhow!("compose frame: {e}"))?;

    let descriptors: Vec<_> = inputs.iter().map(describe).collect();
    println!("{}", serde_json::to_string_pretty(&descriptors)?);
    drain_queue(&rig)?;
    Ok(())
}
