//! Per-job blit-engine driver.
//!
//! Jobs follow a two-phase protocol: configure (`set_src`, `set_dst`,
//! `calculate_all_roi`) then commit (`invalidate`) or back out (`cancel_job`).
//! Either terminal call removes the job id and performs the same fd cleanup;
//! only `invalidate` touches hardware. The job table lives under one mutex and
//! no call here ever blocks: the trigger runs synchronously on the caller's
//! thread and completion is observed later through the returned fence.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::engine::backend::{
    BackendStats, BlitBackend, DestConfig, EngineKind, QualityParams, SourceConfig,
};
use crate::engine::job::{JobId, JobParam, JobStage, JobTable, SourceState};
use crate::fence::Fence;
use crate::foundation::config::CompositorConfig;
use crate::foundation::diag::DiagRing;
use crate::foundation::error::{OverblitError, OverblitResult};
use crate::geometry::roi::{RoiRequest, RoiSet, calculate_roi};

/// Per-frame scheduling input, consumed opaquely by the backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulingHints {
    /// Estimated CLOCK_MONOTONIC timestamp of the next vsync, if the estimator
    /// produced one this frame.
    pub next_vsync_ns: Option<u64>,
}

/// Engine-level counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct EngineStats {
    pub created: u64,
    pub invalidated: u64,
    pub cancelled: u64,
    pub validation_failures: u64,
    pub backend_rejections: u64,
}

struct EngineInner {
    table: JobTable,
    stream: Box<dyn BlitBackend>,
    direct: Box<dyn BlitBackend>,
    next_serial: u64,
    stats: EngineStats,
}

/// Driver for the fixed-function blit engine.
pub struct BlitJobEngine {
    inner: Mutex<EngineInner>,
    config: Arc<CompositorConfig>,
    diag: Arc<DiagRing>,
}

impl BlitJobEngine {
    pub fn new(
        config: Arc<CompositorConfig>,
        stream: Box<dyn BlitBackend>,
        direct: Box<dyn BlitBackend>,
        diag: Arc<DiagRing>,
    ) -> Self {
        Self {
            inner: Mutex::new(EngineInner {
                table: JobTable::new(),
                stream,
                direct,
                next_serial: 1,
                stats: EngineStats::default(),
            }),
            config,
            diag,
        }
    }

    /// Engine with the built-in software backends.
    pub fn with_software_backends(config: Arc<CompositorConfig>, diag: Arc<DiagRing>) -> Self {
        Self::new(
            config,
            Box::new(crate::engine::backend::StreamBackend::new()),
            Box::new(crate::engine::backend::DirectBackend::new()),
            diag,
        )
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Open a job on the given engine path. The returned id stays valid until
    /// exactly one terminal call (`invalidate` or `cancel_job`).
    pub fn create_job(&self, kind: EngineKind) -> OverblitResult<JobId> {
        let mut inner = self.lock();
        let serial = inner.next_serial;
        inner.next_serial += 1;

        let accepted = match backend_for(&mut inner, kind).begin_job(serial) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    target: "overblit::engine",
                    "job {serial}: {kind:?} backend refused creation: {e}"
                );
                false
            }
        };

        let id = inner.table.insert(JobParam {
            serial,
            kind,
            accepted,
            stage: JobStage::Created,
            src: None,
            dst: None,
            rois: None,
            expected_done_ns: None,
        });
        inner.stats.created += 1;
        tracing::trace!(target: "overblit::engine", "job {serial} created as {id} on {kind:?}");
        Ok(id)
    }

    /// Record the source side. Takes ownership of the acquire fence; the
    /// caller's handle is gone after this returns.
    pub fn set_src(
        &self,
        id: JobId,
        config: SourceConfig,
        acquire_fence: Option<Fence>,
    ) -> OverblitResult<()> {
        let mut inner = self.lock();
        let job = resolve(&mut inner.table, id, &self.diag)?;
        if job.stage != JobStage::Created {
            return Err(OverblitError::lifecycle(format!(
                "job {id}: set_src in stage {:?}",
                job.stage
            )));
        }
        job.src = Some(SourceState {
            config,
            acquire_fence,
        });
        job.stage = JobStage::SourceConfigured;
        Ok(())
    }

    /// Record the destination side with its raw, unaligned crop rectangles.
    pub fn set_dst(&self, id: JobId, config: DestConfig) -> OverblitResult<()> {
        let mut inner = self.lock();
        let job = resolve(&mut inner.table, id, &self.diag)?;
        if job.stage != JobStage::SourceConfigured {
            return Err(OverblitError::lifecycle(format!(
                "job {id}: set_dst in stage {:?}",
                job.stage
            )));
        }
        job.dst = Some(config);
        job.stage = JobStage::DestConfigured;
        Ok(())
    }

    /// Reconcile the job's crops into the engine ROI triple. Pure; no hardware
    /// interaction. The result is recorded on the job and returned.
    pub fn calculate_all_roi(&self, id: JobId, want_content: bool) -> OverblitResult<RoiSet> {
        let mut inner = self.lock();
        let job = resolve(&mut inner.table, id, &self.diag)?;
        let rois = compute_rois(job, want_content).ok_or_else(|| {
            OverblitError::config(format!("job {id}: ROI requested before src/dst configured"))
        })?;
        job.rois = Some(rois);
        Ok(rois)
    }

    /// Commit: validate, submit to the chosen backend, trigger, and retire the
    /// id. On validation failure the cancel path runs instead and the error is
    /// returned; cleanup is identical either way, minus the trigger.
    pub fn invalidate(&self, id: JobId, hints: SchedulingHints) -> OverblitResult<Fence> {
        let mut inner = self.lock();
        let Some(mut job) = inner.table.remove(id) else {
            self.diag
                .fatal_invariant(&format!("invalidate on stale job id {id}"));
            return Err(OverblitError::lifecycle(format!("stale job id {id}")));
        };

        if job.rois.is_none() {
            job.rois = compute_rois(&job, false);
        }

        if let Err(e) = error_check(&inner, &job) {
            let serial = job.serial;
            if job.accepted {
                backend_for(&mut inner, job.kind).abandon(serial);
            }
            inner.stats.validation_failures += 1;
            tracing::warn!(target: "overblit::engine", "job {serial}: rejected: {e}");
            // Fences recorded on the job drop here, same as cancel.
            return Err(e);
        }

        let serial = job.serial;
        let kind = job.kind;
        let (Some(mut src), Some(dst), Some(rois)) = (job.src.take(), job.dst.take(), job.rois)
        else {
            backend_for(&mut inner, kind).abandon(serial);
            return Err(OverblitError::config(format!(
                "job {serial}: invalidate before full configuration"
            )));
        };

        let quality = QualityParams {
            enhance: src.config.pq_enhance || dst.pq_enhance,
            color_range: src.config.color_range,
        };
        let deadline_ns = hints
            .next_vsync_ns
            .map(|vsync| vsync.saturating_sub(self.config.blit_margin_ns));

        let submitted = {
            let backend = backend_for(&mut inner, kind);
            backend
                .configure_source(serial, &src.config)
                .and_then(|()| backend.configure_destination(serial, &dst, &rois))
                .and_then(|()| backend.set_quality(serial, &quality))
                .and_then(|()| {
                    if let Some(ns) = deadline_ns {
                        backend.set_deadline(serial, ns);
                    }
                    backend.trigger(serial, src.acquire_fence.take())
                })
        };

        match submitted {
            Ok(fence) => {
                inner.stats.invalidated += 1;
                tracing::trace!(
                    target: "overblit::engine",
                    "job {serial} triggered on {kind:?}, deadline {deadline_ns:?}"
                );
                Ok(fence)
            }
            Err(e) => {
                backend_for(&mut inner, kind).abandon(serial);
                inner.stats.backend_rejections += 1;
                Err(OverblitError::config(format!(
                    "job {serial}: backend rejected at trigger time: {e}"
                )))
            }
        }
    }

    /// Back out: drop recorded fences, abandon the backend job if it was
    /// accepted, retire the id. At most once per id; a second terminal call
    /// finds the id stale.
    pub fn cancel_job(&self, id: JobId) -> OverblitResult<()> {
        let mut inner = self.lock();
        let Some(job) = inner.table.remove(id) else {
            self.diag
                .fatal_invariant(&format!("cancel_job on stale job id {id}"));
            return Err(OverblitError::lifecycle(format!("stale job id {id}")));
        };
        if job.accepted {
            backend_for(&mut inner, job.kind).abandon(job.serial);
        }
        inner.stats.cancelled += 1;
        tracing::trace!(target: "overblit::engine", "job {} cancelled", job.serial);
        // job (and any fences it holds) drops here.
        Ok(())
    }

    pub fn contains_job(&self, id: JobId) -> bool {
        self.lock().table.contains(id)
    }

    pub fn live_jobs(&self) -> usize {
        self.lock().table.len()
    }

    pub fn stats(&self) -> EngineStats {
        self.lock().stats
    }

    pub fn backend_stats(&self, kind: EngineKind) -> BackendStats {
        let inner = self.lock();
        match kind {
            EngineKind::Stream => inner.stream.stats(),
            EngineKind::Direct => inner.direct.stats(),
        }
    }
}

fn backend_for<'a>(inner: &'a mut EngineInner, kind: EngineKind) -> &'a mut dyn BlitBackend {
    match kind {
        EngineKind::Stream => inner.stream.as_mut(),
        EngineKind::Direct => inner.direct.as_mut(),
    }
}

fn resolve<'a>(
    table: &'a mut JobTable,
    id: JobId,
    diag: &DiagRing,
) -> OverblitResult<&'a mut JobParam> {
    if !table.contains(id) {
        diag.fatal_invariant(&format!("stale job id {id}"));
        return Err(OverblitError::lifecycle(format!("stale job id {id}")));
    }
    table
        .get_mut(id)
        .ok_or_else(|| OverblitError::lifecycle(format!("stale job id {id}")))
}

fn compute_rois(job: &JobParam, want_content: bool) -> Option<RoiSet> {
    let src = job.src.as_ref()?;
    let dst = job.dst.as_ref()?;
    Some(calculate_roi(
        &RoiRequest {
            src_crop: dst.src_crop,
            dst_crop: dst.dst_crop,
            src_extent: (src.config.width as i32, src.config.height as i32),
            dst_extent: (dst.width as i32, dst.height as i32),
            dst_format: dst.format,
            transform: dst.transform,
            interlaced: src.config.interlaced,
        },
        want_content,
    ))
}

/// Validation gate run before any hardware interaction.
fn error_check(inner: &EngineInner, job: &JobParam) -> OverblitResult<()> {
    let serial = job.serial;
    if !job.accepted {
        return Err(OverblitError::config(format!(
            "job {serial}: backend creation did not succeed"
        )));
    }
    let src = job
        .src
        .as_ref()
        .ok_or_else(|| OverblitError::config(format!("job {serial}: source not configured")))?;
    if src.config.fd < 0 && src.config.secure_handle.is_none() {
        return Err(OverblitError::config(format!(
            "job {serial}: invalid source fd"
        )));
    }
    let dst = job
        .dst
        .as_ref()
        .ok_or_else(|| OverblitError::config(format!("job {serial}: destination not configured")))?;
    if dst.fd < 0 && dst.secure_handle.is_none() {
        return Err(OverblitError::config(format!(
            "job {serial}: invalid destination fd"
        )));
    }
    if let Some(rois) = &job.rois
        && (rois.src.width <= 1 || rois.src.height <= 1)
    {
        return Err(OverblitError::config(format!(
            "job {serial}: source crop {}x{} too small to blit",
            rois.src.width, rois.src.height
        )));
    }
    if dst.dst_crop.width <= 0 || dst.dst_crop.height <= 0 {
        return Err(OverblitError::config(format!(
            "job {serial}: degenerate destination crop {}x{}",
            dst.dst_crop.width, dst.dst_crop.height
        )));
    }
    let backend: &dyn BlitBackend = match job.kind {
        EngineKind::Stream => inner.stream.as_ref(),
        EngineKind::Direct => inner.direct.as_ref(),
    };
    if !backend.probe(&src.config, dst) {
        return Err(OverblitError::config(format!(
            "job {serial}: {:?} path rejected by capability probe",
            job.kind
        )));
    }
    Ok(())
}
