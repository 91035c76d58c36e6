//! The two-variant hardware seam.
//!
//! Both engine paths speak the same protocol (configure source, configure
//! destination, quality, optional deadline hint, trigger) and hand back a
//! completion fence. A job is bound to one variant at creation and never mixes
//! calls between them. The implementations here are software reference engines:
//! they honor the full protocol, enforce its ordering, and complete
//! asynchronously through eventfd-backed fences, but do not touch pixel data.
//! Binding a kernel driver replaces these internals, not the trait.

use std::collections::HashMap;
use std::os::fd::RawFd;

use crate::buffer::format::{BufferConfig, ColorRange, PixelFormat};
use crate::fence::{Fence, fence_pair};
use crate::foundation::error::{OverblitError, OverblitResult};
use crate::geometry::roi::RoiSet;
use crate::geometry::{Rect, Rotation, Transform};

/// Which engine path a job runs on. Chosen once at job creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EngineKind {
    /// Queue-fed stream path. Allocates its native job id lazily and accepts
    /// any supported transform.
    Stream,
    /// Register-mapped direct path. Native id is allocated up front; no
    /// rotation and no secure output.
    Direct,
}

/// Static HDR metadata forwarded to the engine's quality block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HdrMetadata {
    pub max_content_light_level: u32,
    pub max_frame_average_light_level: u32,
}

/// Source-side job configuration.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Borrowed view of the source buffer fd; the caller keeps ownership.
    pub fd: RawFd,
    /// Secure buffer reference when the source is protected.
    pub secure_handle: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub layout: BufferConfig,
    pub color_range: ColorRange,
    /// Request the engine's picture-quality enhancement on this source.
    pub pq_enhance: bool,
    pub hdr: Option<HdrMetadata>,
    pub interlaced: bool,
}

/// Destination-side job configuration. Crop rectangles are the raw, unaligned
/// requests; the reconciled ROIs travel separately.
#[derive(Clone, Debug)]
pub struct DestConfig {
    pub fd: RawFd,
    pub secure_handle: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub layout: BufferConfig,
    pub src_crop: Rect,
    pub dst_crop: Rect,
    pub transform: Transform,
    pub pq_enhance: bool,
    pub secure: bool,
}

/// Parameters for the engine's quality block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QualityParams {
    pub enhance: bool,
    pub color_range: ColorRange,
}

/// Per-backend protocol counters, mostly for tests and the soak CLI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct BackendStats {
    pub begun: u64,
    pub triggered: u64,
    pub abandoned: u64,
    pub deadline_hints: u64,
}

/// One hardware engine path.
///
/// `serial` is the engine driver's synthetic job serial; implementations map it
/// to their own native numbering internally.
pub trait BlitBackend: Send {
    fn kind(&self) -> EngineKind;

    /// Capability probe: can this path run the described job at all? Runs
    /// before submission so rejection surfaces as a configuration error.
    fn probe(&self, src: &SourceConfig, dst: &DestConfig) -> bool;

    /// Accept a new job. Acceptance is recorded by the caller and checked
    /// before any later submission.
    fn begin_job(&mut self, serial: u64) -> OverblitResult<()>;

    fn configure_source(&mut self, serial: u64, src: &SourceConfig) -> OverblitResult<()>;

    fn configure_destination(
        &mut self,
        serial: u64,
        dst: &DestConfig,
        rois: &RoiSet,
    ) -> OverblitResult<()>;

    fn set_quality(&mut self, serial: u64, params: &QualityParams) -> OverblitResult<()>;

    /// Advisory expected-finish time (CLOCK_MONOTONIC ns). Scheduling input
    /// only; the engine may ignore it.
    fn set_deadline(&mut self, serial: u64, expected_done_ns: u64);

    /// Fire the configured job. The wait fence is consumed: the engine starts
    /// after it signals. Returns the completion fence.
    fn trigger(&mut self, serial: u64, wait_fence: Option<Fence>) -> OverblitResult<Fence>;

    /// Abandon an accepted job without triggering. Identical cleanup to the
    /// success path minus the trigger.
    fn abandon(&mut self, serial: u64);

    fn stats(&self) -> BackendStats;
}

#[derive(Debug)]
struct NativeState {
    native_id: Option<u64>,
    src_configured: bool,
    dst_configured: bool,
    deadline_ns: Option<u64>,
}

fn complete_async(wait_fence: Option<Fence>) -> OverblitResult<Fence> {
    let (fence, signaller) = fence_pair()
        .map_err(|e| OverblitError::backend(format!("completion fence creation failed: {e}")))?;
    std::thread::spawn(move || {
        if let Some(wait) = wait_fence {
            let _ = wait.wait();
        }
        let _ = signaller.signal();
    });
    Ok(fence)
}

/// Queue-fed stream engine. Native job ids are allocated lazily at first
/// configure, matching stream hardware that only numbers work it has admitted
/// into its command queue.
#[derive(Debug, Default)]
pub struct StreamBackend {
    jobs: HashMap<u64, NativeState>,
    next_native_id: u64,
    stats: BackendStats,
}

impl StreamBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlitBackend for StreamBackend {
    fn kind(&self) -> EngineKind {
        EngineKind::Stream
    }

    fn probe(&self, _src: &SourceConfig, _dst: &DestConfig) -> bool {
        true
    }

    fn begin_job(&mut self, serial: u64) -> OverblitResult<()> {
        self.jobs.insert(
            serial,
            NativeState {
                native_id: None,
                src_configured: false,
                dst_configured: false,
                deadline_ns: None,
            },
        );
        self.stats.begun += 1;
        Ok(())
    }

    fn configure_source(&mut self, serial: u64, src: &SourceConfig) -> OverblitResult<()> {
        let state = self
            .jobs
            .get_mut(&serial)
            .ok_or_else(|| OverblitError::backend(format!("stream: unknown job {serial}")))?;
        if state.native_id.is_none() {
            self.next_native_id += 1;
            state.native_id = Some(self.next_native_id);
            tracing::trace!(
                target: "overblit::backend",
                "stream job {serial}: native id {} allocated",
                self.next_native_id
            );
        }
        if src.fd < 0 {
            return Err(OverblitError::backend(format!(
                "stream job {serial}: invalid source fd"
            )));
        }
        state.src_configured = true;
        Ok(())
    }

    fn configure_destination(
        &mut self,
        serial: u64,
        _dst: &DestConfig,
        rois: &RoiSet,
    ) -> OverblitResult<()> {
        let state = self
            .jobs
            .get_mut(&serial)
            .ok_or_else(|| OverblitError::backend(format!("stream: unknown job {serial}")))?;
        if rois.output.is_degenerate() {
            return Err(OverblitError::backend(format!(
                "stream job {serial}: degenerate output ROI {:?}",
                rois.output
            )));
        }
        state.dst_configured = true;
        Ok(())
    }

    fn set_quality(&mut self, serial: u64, _params: &QualityParams) -> OverblitResult<()> {
        self.jobs
            .get_mut(&serial)
            .ok_or_else(|| OverblitError::backend(format!("stream: unknown job {serial}")))?;
        Ok(())
    }

    fn set_deadline(&mut self, serial: u64, expected_done_ns: u64) {
        if let Some(state) = self.jobs.get_mut(&serial) {
            state.deadline_ns = Some(expected_done_ns);
            self.stats.deadline_hints += 1;
        }
    }

    fn trigger(&mut self, serial: u64, wait_fence: Option<Fence>) -> OverblitResult<Fence> {
        let state = self
            .jobs
            .remove(&serial)
            .ok_or_else(|| OverblitError::backend(format!("stream: unknown job {serial}")))?;
        if !state.src_configured || !state.dst_configured {
            self.jobs.insert(serial, state);
            return Err(OverblitError::backend(format!(
                "stream job {serial}: trigger before full configuration"
            )));
        }
        tracing::trace!(
            target: "overblit::backend",
            "stream job {serial} (native {:?}) triggered, deadline {:?}",
            state.native_id,
            state.deadline_ns
        );
        self.stats.triggered += 1;
        complete_async(wait_fence)
    }

    fn abandon(&mut self, serial: u64) {
        if self.jobs.remove(&serial).is_some() {
            self.stats.abandoned += 1;
        }
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

/// Register-mapped direct engine path. Numbers jobs up front, requires
/// source-before-destination programming, and cannot rotate or write protected
/// buffers.
#[derive(Debug, Default)]
pub struct DirectBackend {
    jobs: HashMap<u64, NativeState>,
    next_native_id: u64,
    stats: BackendStats,
}

impl DirectBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlitBackend for DirectBackend {
    fn kind(&self) -> EngineKind {
        EngineKind::Direct
    }

    fn probe(&self, _src: &SourceConfig, dst: &DestConfig) -> bool {
        dst.transform.rotation == Rotation::Rot0 && !dst.secure
    }

    fn begin_job(&mut self, serial: u64) -> OverblitResult<()> {
        self.next_native_id += 1;
        self.jobs.insert(
            serial,
            NativeState {
                native_id: Some(self.next_native_id),
                src_configured: false,
                dst_configured: false,
                deadline_ns: None,
            },
        );
        self.stats.begun += 1;
        Ok(())
    }

    fn configure_source(&mut self, serial: u64, src: &SourceConfig) -> OverblitResult<()> {
        let state = self
            .jobs
            .get_mut(&serial)
            .ok_or_else(|| OverblitError::backend(format!("direct: unknown job {serial}")))?;
        if src.fd < 0 {
            return Err(OverblitError::backend(format!(
                "direct job {serial}: invalid source fd"
            )));
        }
        state.src_configured = true;
        Ok(())
    }

    fn configure_destination(
        &mut self,
        serial: u64,
        dst: &DestConfig,
        rois: &RoiSet,
    ) -> OverblitResult<()> {
        let state = self
            .jobs
            .get_mut(&serial)
            .ok_or_else(|| OverblitError::backend(format!("direct: unknown job {serial}")))?;
        if !state.src_configured {
            return Err(OverblitError::backend(format!(
                "direct job {serial}: destination programmed before source"
            )));
        }
        if dst.transform.rotation != Rotation::Rot0 {
            return Err(OverblitError::backend(format!(
                "direct job {serial}: rotation unsupported on the direct path"
            )));
        }
        if rois.output.is_degenerate() {
            return Err(OverblitError::backend(format!(
                "direct job {serial}: degenerate output ROI {:?}",
                rois.output
            )));
        }
        state.dst_configured = true;
        Ok(())
    }

    fn set_quality(&mut self, serial: u64, _params: &QualityParams) -> OverblitResult<()> {
        self.jobs
            .get_mut(&serial)
            .ok_or_else(|| OverblitError::backend(format!("direct: unknown job {serial}")))?;
        Ok(())
    }

    fn set_deadline(&mut self, serial: u64, expected_done_ns: u64) {
        if let Some(state) = self.jobs.get_mut(&serial) {
            state.deadline_ns = Some(expected_done_ns);
            self.stats.deadline_hints += 1;
        }
    }

    fn trigger(&mut self, serial: u64, wait_fence: Option<Fence>) -> OverblitResult<Fence> {
        let state = self
            .jobs
            .remove(&serial)
            .ok_or_else(|| OverblitError::backend(format!("direct: unknown job {serial}")))?;
        if !state.src_configured || !state.dst_configured {
            self.jobs.insert(serial, state);
            return Err(OverblitError::backend(format!(
                "direct job {serial}: trigger before full configuration"
            )));
        }
        self.stats.triggered += 1;
        complete_async(wait_fence)
    }

    fn abandon(&mut self, serial: u64) {
        if self.jobs.remove(&serial).is_some() {
            self.stats.abandoned += 1;
        }
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::format::{FormatResolver, LinearResolver};

    fn src_config(fd: RawFd) -> SourceConfig {
        SourceConfig {
            fd,
            secure_handle: None,
            width: 64,
            height: 64,
            format: PixelFormat::Rgba8888,
            layout: LinearResolver.resolve(64, 64, PixelFormat::Rgba8888).unwrap(),
            color_range: ColorRange::Full,
            pq_enhance: false,
            hdr: None,
            interlaced: false,
        }
    }

    fn dst_config(fd: RawFd, transform: Transform) -> DestConfig {
        DestConfig {
            fd,
            secure_handle: None,
            width: 64,
            height: 64,
            format: PixelFormat::Rgba8888,
            layout: LinearResolver.resolve(64, 64, PixelFormat::Rgba8888).unwrap(),
            src_crop: Rect::new(0, 0, 64, 64),
            dst_crop: Rect::new(0, 0, 64, 64),
            transform,
            pq_enhance: false,
            secure: false,
        }
    }

    fn rois() -> RoiSet {
        RoiSet {
            src: Rect::new(0, 0, 64, 64),
            dst: Rect::new(0, 0, 64, 64),
            output: Rect::new(0, 0, 64, 64),
            content: None,
        }
    }

    #[test]
    fn stream_defers_native_id_until_configure() {
        let mut backend = StreamBackend::new();
        backend.begin_job(1).unwrap();
        assert_eq!(backend.jobs[&1].native_id, None);
        backend.configure_source(1, &src_config(0)).unwrap();
        assert!(backend.jobs[&1].native_id.is_some());
    }

    #[test]
    fn direct_numbers_jobs_up_front() {
        let mut backend = DirectBackend::new();
        backend.begin_job(9).unwrap();
        assert!(backend.jobs[&9].native_id.is_some());
    }

    #[test]
    fn direct_rejects_rotation_at_probe() {
        let backend = DirectBackend::new();
        let src = src_config(0);
        assert!(backend.probe(&src, &dst_config(1, Transform::IDENTITY)));
        assert!(!backend.probe(&src, &dst_config(1, Transform::rotate(Rotation::Rot90))));
    }

    #[test]
    fn trigger_before_configuration_is_rejected() {
        let mut backend = StreamBackend::new();
        backend.begin_job(1).unwrap();
        backend.configure_source(1, &src_config(0)).unwrap();
        let err = backend.trigger(1, None);
        assert!(err.is_err());
        // The job survives a rejected trigger and can be completed.
        backend
            .configure_destination(1, &dst_config(1, Transform::IDENTITY), &rois())
            .unwrap();
        let fence = backend.trigger(1, None).unwrap();
        fence.wait().unwrap();
        assert_eq!(backend.stats().triggered, 1);
    }

    #[test]
    fn completion_waits_for_the_wait_fence() {
        let mut backend = StreamBackend::new();
        backend.begin_job(1).unwrap();
        backend.configure_source(1, &src_config(0)).unwrap();
        backend
            .configure_destination(1, &dst_config(1, Transform::IDENTITY), &rois())
            .unwrap();

        let (wait, signaller) = fence_pair().unwrap();
        let done = backend.trigger(1, Some(wait)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!done.is_signalled());
        signaller.signal().unwrap();
        done.wait().unwrap();
    }

    #[test]
    fn abandon_is_counted_once() {
        let mut backend = DirectBackend::new();
        backend.begin_job(3).unwrap();
        backend.abandon(3);
        backend.abandon(3);
        assert_eq!(backend.stats().abandoned, 1);
    }
}
