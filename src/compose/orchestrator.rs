//! Per-display, per-frame composition driver.
//!
//! For every hardware-composited layer the orchestrator decides whether the
//! blit engine must run, moves output buffers between the slot queue and the
//! job engine, and republishes results to the overlay stage. The engine never
//! sees the queue: every buffer handle crosses that boundary here.

use std::collections::{HashMap, HashSet};
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::buffer::alloc::{BufferAllocator, BufferHandle};
use crate::buffer::format::{BufferConfigCache, FormatResolver, PixelFormat};
use crate::buffer::queue::{BufferQueueConfig, BufferSlotQueue, DisplayBuffer};
use crate::compose::fill::FillTracker;
use crate::compose::mirror::{DisplayGeometry, mirror_geometry};
use crate::engine::backend::{DestConfig, EngineKind, HdrMetadata, SourceConfig};
use crate::engine::blitter::{BlitJobEngine, SchedulingHints};
use crate::engine::job::JobId;
use crate::fence::{self, Fence};
use crate::foundation::config::CompositorConfig;
use crate::foundation::diag::DiagRing;
use crate::foundation::error::{OverblitError, OverblitResult};
use crate::geometry::roi::RoiSet;
use crate::geometry::{Rect, Transform};

/// Side of a small square constant-color buffer kept for solid fills.
const FILL_SOURCE_DIM: u32 = 16;

/// Reserved layer keys for the special paths.
const MIRROR_KEY: u64 = u64::MAX;
const FILL_KEY: u64 = u64::MAX - 1;

/// Producer-side description of a layer's source buffer. The fd is a borrowed
/// view; the layer owner keeps the handle alive across the frame.
#[derive(Clone, Debug)]
pub struct SourceBuffer {
    pub fd: RawFd,
    pub secure_handle: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub interlaced: bool,
}

/// One hardware-composited layer as submitted this frame.
#[derive(Debug)]
pub struct LayerFrame {
    /// Stable layer identity across frames.
    pub key: u64,
    pub source: SourceBuffer,
    pub src_crop: Rect,
    pub dst_crop: Rect,
    pub transform: Transform,
    pub dirty: bool,
    /// The producer marked this layer safe to skip when clean.
    pub skippable: bool,
    /// Layer rides the direct engine path.
    pub direct_link: bool,
    pub secure: bool,
    pub sharpen: bool,
    pub hdr: Option<HdrMetadata>,
    /// Signalled when the producer finished writing the source buffer.
    pub acquire_fence: Option<Fence>,
}

/// Descriptor republished to the overlay input.
#[derive(Debug)]
pub struct OverlayInput {
    pub layer_key: u64,
    pub buffer_fd: RawFd,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pitch: u32,
    /// Content rectangle inside the published buffer.
    pub crop: Rect,
    /// On-screen placement.
    pub dst: Rect,
    /// Whether the blit engine produced this buffer (false: source published
    /// as-is).
    pub blitted: bool,
    /// Blitted: duplicated completion fence. Skipped: synthesized from the
    /// per-layer last-known-fence table, so downstream always observes a valid
    /// signal.
    pub fence: Option<Fence>,
}

/// Cumulative per-orchestrator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct FrameStats {
    pub layers_total: u64,
    pub blitted: u64,
    pub skipped: u64,
    pub blit_failures: u64,
    pub fills: u64,
    pub fills_elided: u64,
    pub mirrors: u64,
}

/// Per-display frame driver tying the queue, the engine, and the overlay
/// stage together.
pub struct CompositionOrchestrator {
    display_id: u32,
    config: Arc<CompositorConfig>,
    engine: Arc<BlitJobEngine>,
    queue: BufferSlotQueue,
    allocator: Arc<dyn BufferAllocator>,
    resolver: Box<dyn FormatResolver + Send>,
    source_caches: HashMap<u64, BufferConfigCache>,
    output_cache: BufferConfigCache,
    last_fences: HashMap<u64, Fence>,
    fill: FillTracker,
    fill_source: Option<Arc<BufferHandle>>,
    stats: FrameStats,
}

impl CompositionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        display_id: u32,
        config: Arc<CompositorConfig>,
        output: BufferQueueConfig,
        engine: Arc<BlitJobEngine>,
        allocator: Arc<dyn BufferAllocator>,
        resolver: Box<dyn FormatResolver + Send>,
        diag: Arc<DiagRing>,
    ) -> Self {
        let queue = BufferSlotQueue::new(
            display_id,
            config.queue_slots,
            output,
            Arc::clone(&allocator),
            diag,
        );
        Self {
            display_id,
            config,
            engine,
            queue,
            allocator,
            resolver,
            source_caches: HashMap::new(),
            output_cache: BufferConfigCache::new(),
            last_fences: HashMap::new(),
            fill: FillTracker::new(),
            fill_source: None,
            stats: FrameStats::default(),
        }
    }

    pub fn display_id(&self) -> u32 {
        self.display_id
    }

    /// The output queue. The overlay stage consumes from here
    /// (`acquire_buffer`/`release_buffer`).
    pub fn queue(&self) -> &BufferSlotQueue {
        &self.queue
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Reconfigure the output buffer class (display mode switch). Forgets the
    /// memoized fill rectangle since the target changed.
    pub fn set_output_config(&mut self, output: BufferQueueConfig) {
        self.queue.set_buffer_param(output);
        self.fill.reset();
    }

    /// Drive one frame. Returns the overlay inputs in layer order.
    pub fn compose_frame(
        &mut self,
        layers: Vec<LayerFrame>,
        hints: SchedulingHints,
    ) -> OverblitResult<Vec<OverlayInput>> {
        let keys: HashSet<u64> = layers.iter().map(|l| l.key).collect();
        self.last_fences.retain(|k, _| keys.contains(k));
        self.source_caches.retain(|k, _| keys.contains(k));

        let mut inputs = Vec::with_capacity(layers.len());
        for mut layer in layers {
            self.stats.layers_total += 1;
            let needs_blit = self.config.debug_always_blit
                || layer.direct_link
                || (layer.dirty && !layer.skippable);
            if !needs_blit {
                self.stats.skipped += 1;
                inputs.push(self.publish_unblitted(layer)?);
                continue;
            }

            match self.blit_layer(&mut layer, hints) {
                Ok(input) => {
                    self.stats.blitted += 1;
                    inputs.push(input);
                }
                Err(e) => {
                    self.stats.blit_failures += 1;
                    tracing::warn!(
                        target: "overblit::compose",
                        "display {}: layer {} blit failed, publishing source: {e}",
                        self.display_id,
                        layer.key
                    );
                    inputs.push(self.publish_unblitted(layer)?);
                }
            }
        }
        Ok(inputs)
    }

    /// Mirror another display's composed output onto this one.
    pub fn mirror_frame(
        &mut self,
        source: SourceBuffer,
        acquire_fence: Option<Fence>,
        source_geometry: &DisplayGeometry,
        target_geometry: &DisplayGeometry,
        hints: SchedulingHints,
    ) -> OverblitResult<OverlayInput> {
        let (src_crop, dst_rect, transform) = mirror_geometry(source_geometry, target_geometry);
        let mut layer = LayerFrame {
            key: MIRROR_KEY,
            source,
            src_crop,
            dst_crop: dst_rect,
            transform,
            dirty: true,
            skippable: false,
            direct_link: false,
            secure: false,
            sharpen: false,
            hdr: None,
            acquire_fence,
        };
        let input = self.blit_layer(&mut layer, hints)?;
        self.stats.mirrors += 1;
        Ok(input)
    }

    /// Paint a constant-color rectangle (letterbox/pillarbox bars) by blitting
    /// a small constant source scaled to `rect`. Elided when `rect` matches
    /// the previous fill.
    pub fn fill_solid(
        &mut self,
        rect: Rect,
        hints: SchedulingHints,
    ) -> OverblitResult<Option<OverlayInput>> {
        if !self.fill.needs_fill(rect) {
            self.stats.fills_elided += 1;
            return Ok(None);
        }

        let handle = match &self.fill_source {
            Some(h) => Arc::clone(h),
            None => {
                let cfg = BufferQueueConfig::new(
                    FILL_SOURCE_DIM,
                    FILL_SOURCE_DIM,
                    PixelFormat::Rgba8888,
                );
                let h = self.allocator.allocate(&cfg, false)?;
                self.fill_source = Some(Arc::clone(&h));
                h
            }
        };

        let mut layer = LayerFrame {
            key: FILL_KEY,
            source: SourceBuffer {
                fd: handle.raw_fd(),
                secure_handle: None,
                width: handle.width,
                height: handle.height,
                format: handle.format,
                interlaced: false,
            },
            src_crop: Rect::new(0, 0, FILL_SOURCE_DIM as i32, FILL_SOURCE_DIM as i32),
            dst_crop: rect,
            transform: Transform::IDENTITY,
            dirty: true,
            skippable: false,
            direct_link: false,
            secure: false,
            sharpen: false,
            hdr: None,
            acquire_fence: None,
        };
        let input = self.blit_layer(&mut layer, hints)?;
        self.fill.committed(rect);
        self.stats.fills += 1;
        Ok(Some(input))
    }

    /// Publish a layer's own buffer, synthesizing the fence from the last
    /// known completion for that layer.
    fn publish_unblitted(&mut self, layer: LayerFrame) -> OverblitResult<OverlayInput> {
        let fence = match self.last_fences.get(&layer.key) {
            Some(f) => Some(f.dup().map_err(|e| {
                OverblitError::backend(format!("fence duplication failed: {e}"))
            })?),
            None => None,
        };
        let pitch = self
            .source_caches
            .entry(layer.key)
            .or_default()
            .resolve(
                self.resolver.as_ref(),
                layer.source.width,
                layer.source.height,
                layer.source.format,
            )
            .map(|layout| layout.pitch)
            .unwrap_or(0);
        // The layer's own acquire fence drops with `layer`; the overlay stage
        // consumes the synthesized signal instead.
        Ok(OverlayInput {
            layer_key: layer.key,
            buffer_fd: layer.source.fd,
            width: layer.source.width,
            height: layer.source.height,
            format: layer.source.format,
            pitch,
            crop: layer.src_crop,
            dst: layer.dst_crop,
            blitted: false,
            fence,
        })
    }

    fn blit_layer(
        &mut self,
        layer: &mut LayerFrame,
        hints: SchedulingHints,
    ) -> OverblitResult<OverlayInput> {
        let mut out = self.queue.dequeue_buffer(true, layer.secure)?;
        let out_index = out.index;
        let kind = if layer.direct_link {
            EngineKind::Direct
        } else {
            EngineKind::Stream
        };
        let job = self.engine.create_job(kind)?;

        match self.run_blit(layer, hints, &mut out, job) {
            Ok((done, rois)) => {
                let publish = done.dup().map_err(|e| {
                    OverblitError::backend(format!("fence duplication failed: {e}"))
                })?;
                let remembered = done.dup().map_err(|e| {
                    OverblitError::backend(format!("fence duplication failed: {e}"))
                })?;
                self.last_fences.insert(layer.key, remembered);

                let input = OverlayInput {
                    layer_key: layer.key,
                    buffer_fd: out.handle.raw_fd(),
                    width: out.handle.width,
                    height: out.handle.height,
                    format: out.format,
                    pitch: out.pitch,
                    crop: rois.dst,
                    dst: layer.dst_crop,
                    blitted: true,
                    fence: Some(publish),
                };

                out.acquire_fence = Some(done);
                out.src_crop = rois.dst;
                out.dst_crop = layer.dst_crop;
                out.sharpen = layer.sharpen;
                self.queue.queue_buffer(out)?;
                Ok(input)
            }
            Err(e) => {
                if self.engine.contains_job(job) {
                    let _ = self.engine.cancel_job(job);
                }
                // `out` still holds the dequeued slot; drop its view and put
                // the slot back.
                drop(out);
                let _ = self.queue.cancel_buffer(out_index);
                Err(e)
            }
        }
    }

    fn run_blit(
        &mut self,
        layer: &mut LayerFrame,
        hints: SchedulingHints,
        out: &mut DisplayBuffer,
        job: JobId,
    ) -> OverblitResult<(Fence, RoiSet)> {
        let src_layout = self
            .source_caches
            .entry(layer.key)
            .or_default()
            .resolve(
                self.resolver.as_ref(),
                layer.source.width,
                layer.source.height,
                layer.source.format,
            )?;

        let src_cfg = SourceConfig {
            fd: layer.source.fd,
            secure_handle: layer.source.secure_handle,
            width: layer.source.width,
            height: layer.source.height,
            format: layer.source.format,
            color_range: src_layout.color_range,
            layout: src_layout,
            pq_enhance: layer.sharpen,
            hdr: layer.hdr,
            interlaced: layer.source.interlaced,
        };

        // The engine must wait for the producer's write and for the previous
        // reader of the output slot.
        let wait = fence::merge(layer.acquire_fence.take(), out.release_fence.take())
            .map_err(|e| OverblitError::backend(format!("fence merge failed: {e}")))?;
        self.engine.set_src(job, src_cfg, wait)?;

        let out_layout = self.output_cache.resolve(
            self.resolver.as_ref(),
            out.handle.width,
            out.handle.height,
            out.format,
        )?;
        let dst_cfg = DestConfig {
            fd: out.handle.raw_fd(),
            secure_handle: None,
            width: out.handle.width,
            height: out.handle.height,
            format: out.format,
            layout: out_layout,
            src_crop: layer.src_crop,
            dst_crop: layer.dst_crop,
            transform: layer.transform,
            pq_enhance: layer.sharpen,
            secure: layer.secure,
        };
        self.engine.set_dst(job, dst_cfg)?;

        let rois = self.engine.calculate_all_roi(job, false)?;
        let done = self.engine.invalidate(job, hints)?;
        Ok((done, rois))
    }
}
