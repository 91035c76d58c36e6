//! Overblit drives a fixed-function hardware blit engine (scale, rotate,
//! format conversion) and synchronizes its output with a display overlay
//! stage under a per-vsync deadline.
//!
//! The pipeline is built from three primitives:
//!
//! - a bounded [`BufferSlotQueue`] mediating producer/consumer handoff of
//!   reusable output buffers,
//! - a per-job [`BlitJobEngine`] speaking the two-phase configure/trigger
//!   protocol against one of two engine paths,
//! - a pure ROI calculator ([`calculate_roi`]) reconciling crop, scale,
//!   rotation, and the even-alignment rules of chroma-subsampled formats.
//!
//! [`CompositionOrchestrator`] ties them together per display and per frame.
//! Threads cooperate through move-only [`Fence`] values rather than callbacks;
//! every fence fd is closed exactly once by construction.

pub mod buffer;
pub mod compose;
pub mod engine;
pub mod fence;
pub mod foundation;
pub mod geometry;

pub use crate::buffer::alloc::{BufferAllocator, BufferHandle, SystemAllocator};
pub use crate::buffer::format::{
    BufferConfig, BufferConfigCache, ColorRange, FormatResolver, LinearResolver, PixelFormat,
};
pub use crate::buffer::queue::{
    BufferQueueConfig, BufferSlotQueue, DisplayBuffer, QueueStats, SlotState,
};
pub use crate::compose::mirror::DisplayGeometry;
pub use crate::compose::orchestrator::{
    CompositionOrchestrator, FrameStats, LayerFrame, OverlayInput, SourceBuffer,
};
pub use crate::engine::backend::{
    BackendStats, BlitBackend, DestConfig, DirectBackend, EngineKind, HdrMetadata, SourceConfig,
    StreamBackend,
};
pub use crate::engine::blitter::{BlitJobEngine, EngineStats, SchedulingHints};
pub use crate::engine::job::{JobId, JobStage};
pub use crate::fence::{Fence, FenceSignaller};
pub use crate::foundation::config::CompositorConfig;
pub use crate::foundation::diag::DiagRing;
pub use crate::foundation::error::{OverblitError, OverblitResult};
pub use crate::geometry::roi::{RoiRequest, RoiSet, calculate_roi};
pub use crate::geometry::{Rect, Rotation, Transform};
