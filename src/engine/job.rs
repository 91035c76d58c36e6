//! Generation-checked table of in-flight blit jobs.
//!
//! A [`JobId`] carries both a slot index and the generation it was minted in;
//! the table bumps the generation on removal, so a handle kept past its
//! terminal call stops resolving instead of silently addressing a recycled
//! slot. An id exists iff its job is between creation and its single terminal
//! call; the generation check makes that a structural property.

use crate::engine::backend::{DestConfig, EngineKind, SourceConfig};
use crate::fence::Fence;
use crate::geometry::roi::RoiSet;

/// Handle to an in-flight job. Stale handles are rejected, not re-resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobId {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Configuration progress of one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStage {
    Created,
    SourceConfigured,
    DestConfigured,
}

/// Recorded source side plus the acquire fence the engine will consume.
#[derive(Debug)]
pub struct SourceState {
    pub config: SourceConfig,
    pub acquire_fence: Option<Fence>,
}

/// Everything recorded for one job between creation and its terminal call.
#[derive(Debug)]
pub struct JobParam {
    /// Synthetic monotonic serial, independent of backend-native numbering.
    pub serial: u64,
    pub kind: EngineKind,
    /// Whether the backend accepted the job at creation.
    pub accepted: bool,
    pub stage: JobStage,
    pub src: Option<SourceState>,
    pub dst: Option<DestConfig>,
    pub rois: Option<RoiSet>,
    /// Advisory expected-finish time submitted to the backend, for telemetry.
    pub expected_done_ns: Option<u64>,
}

struct Entry {
    generation: u32,
    job: Option<JobParam>,
}

/// Arena of live jobs. Not thread-safe by itself; the engine wraps it in its
/// one mutex.
#[derive(Default)]
pub struct JobTable {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn insert(&mut self, job: JobParam) -> JobId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.job = Some(job);
            return JobId {
                index,
                generation: entry.generation,
            };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            job: Some(job),
        });
        JobId {
            index,
            generation: 0,
        }
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut JobParam> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.job.as_mut()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.entries
            .get(id.index as usize)
            .is_some_and(|e| e.generation == id.generation && e.job.is_some())
    }

    /// Remove a job, invalidating its id. The generation bump makes any copy
    /// of the handle stale immediately.
    pub fn remove(&mut self, id: JobId) -> Option<JobParam> {
        let entry = self.entries.get_mut(id.index as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let job = entry.job.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(job)
    }
}
