//! Bounded producer/consumer queue of reusable output buffers.
//!
//! Slots move `Free→Dequeued→Queued→Acquired→Free`; cancellation returns a
//! Dequeued slot to Free directly, and a synchronous-mode switch drains Queued
//! entries back to Free. One mutex serializes every operation; the only
//! designed blocking points are a non-async [`BufferSlotQueue::dequeue_buffer`]
//! or [`BufferSlotQueue::acquire_buffer`] waiting on the condvar.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::buffer::alloc::{BufferAllocator, BufferHandle};
use crate::buffer::format::PixelFormat;
use crate::fence::Fence;
use crate::foundation::diag::DiagRing;
use crate::foundation::error::{OverblitError, OverblitResult};
use crate::geometry::Rect;

/// Target buffer class for the queue. Changing any field forces reallocation of
/// the underlying buffer on the next dequeue.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BufferQueueConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Explicit byte-size override; 0 derives the size from the resolved
    /// layout.
    pub size: u32,
    /// Default protection class for dequeues that do not override it.
    pub protect: bool,
    pub compression: bool,
}

impl BufferQueueConfig {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            size: 0,
            protect: false,
            compression: false,
        }
    }
}

/// Slot lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Dequeued,
    Queued,
    Acquired,
}

struct Slot {
    state: SlotState,
    handle: Option<Arc<BufferHandle>>,
    secure_handle: Option<Arc<BufferHandle>>,
    /// Which handle class the current producer dequeued into.
    active_secure: bool,
    acquire_fence: Option<Fence>,
    release_fence: Option<Fence>,
    sequence: u64,
    src_crop: Rect,
    dst_crop: Rect,
    sharpen: bool,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: SlotState::Free,
            handle: None,
            secure_handle: None,
            active_secure: false,
            acquire_fence: None,
            release_fence: None,
            sequence: 0,
            src_crop: Rect::new(0, 0, 0, 0),
            dst_crop: Rect::new(0, 0, 0, 0),
            sharpen: false,
        }
    }
}

/// By-value snapshot of a slot crossing the producer/consumer boundary.
///
/// Handles are shared (`Arc`); fences are moved, never copied. Producers fill
/// the crop metadata and sharpen flag before queueing.
#[derive(Debug)]
pub struct DisplayBuffer {
    pub index: usize,
    pub pool_id: u32,
    pub handle: Arc<BufferHandle>,
    pub pitch: u32,
    pub format: PixelFormat,
    pub size: u32,
    pub protected: bool,
    pub sequence: u64,
    /// Signalled when the producer's write into the buffer completes.
    pub acquire_fence: Option<Fence>,
    /// Signalled when the previous consumer is done reading the buffer.
    pub release_fence: Option<Fence>,
    pub src_crop: Rect,
    pub dst_crop: Rect,
    pub sharpen: bool,
}

/// Observable queue counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub slots: usize,
    pub free: usize,
    pub dequeued: usize,
    pub queued: usize,
    pub acquired: usize,
    pub allocations: u64,
    pub reallocations: u64,
    pub drained_on_mode_switch: u64,
    pub synchronous: bool,
}

struct Inner {
    config: BufferQueueConfig,
    slots: Vec<Slot>,
    fifo: VecDeque<usize>,
    synchronous: bool,
    next_sequence: u64,
    allocations: u64,
    reallocations: u64,
    drained_on_mode_switch: u64,
}

/// Bounded pool of reusable output buffers mediating producer/consumer handoff.
pub struct BufferSlotQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
    allocator: Arc<dyn BufferAllocator>,
    diag: Arc<DiagRing>,
    pool_id: u32,
}

impl BufferSlotQueue {
    pub fn new(
        pool_id: u32,
        slot_count: usize,
        config: BufferQueueConfig,
        allocator: Arc<dyn BufferAllocator>,
        diag: Arc<DiagRing>,
    ) -> Self {
        let slots = (0..slot_count.max(1)).map(|_| Slot::new()).collect();
        Self {
            inner: Mutex::new(Inner {
                config,
                slots,
                fifo: VecDeque::new(),
                synchronous: true,
                next_sequence: 1,
                allocations: 0,
                reallocations: 0,
                drained_on_mode_switch: 0,
            }),
            cond: Condvar::new(),
            allocator,
            diag,
            pool_id,
        }
    }

    pub fn pool_id(&self) -> u32 {
        self.pool_id
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Update the target buffer class. Slots whose allocation no longer matches
    /// reallocate lazily on their next dequeue.
    pub fn set_buffer_param(&self, config: BufferQueueConfig) {
        let mut inner = self.lock();
        if inner.config != config {
            tracing::debug!(
                target: "overblit::queue",
                "pool {}: buffer class now {}x{} {:?} (protect={}, compression={})",
                self.pool_id,
                config.width,
                config.height,
                config.format,
                config.protect,
                config.compression
            );
            inner.config = config;
        }
    }

    /// Switch FIFO handoff on or off. Queued-but-unconsumed entries are drained
    /// back to Free and their fences dropped.
    pub fn set_synchronous_mode(&self, enabled: bool) {
        let mut inner = self.lock();
        if inner.synchronous == enabled {
            return;
        }
        while let Some(index) = inner.fifo.pop_front() {
            let slot = &mut inner.slots[index];
            slot.acquire_fence = None;
            slot.release_fence = None;
            slot.state = SlotState::Free;
            inner.drained_on_mode_switch += 1;
            tracing::debug!(
                target: "overblit::queue",
                "pool {}: drained queued slot {index} on mode switch",
                self.pool_id
            );
        }
        inner.synchronous = enabled;
        self.cond.notify_all();
    }

    /// Take a Free slot for producing into. Blocks until a slot frees up when
    /// the queue is in synchronous mode and `non_blocking` is false; otherwise
    /// `Exhausted` is returned instead of waiting. `secure` selects the
    /// protected allocation path.
    ///
    /// Allocation failure leaves the slot Free and is retryable.
    pub fn dequeue_buffer(
        &self,
        non_blocking: bool,
        secure: bool,
    ) -> OverblitResult<DisplayBuffer> {
        let mut inner = self.lock();
        let index = loop {
            let found = inner
                .slots
                .iter()
                .position(|s| s.state == SlotState::Free);
            match found {
                Some(i) => break i,
                None if non_blocking || !inner.synchronous => {
                    return Err(OverblitError::exhausted(format!(
                        "pool {}: no free output slot",
                        self.pool_id
                    )));
                }
                None => {
                    tracing::trace!(
                        target: "overblit::queue",
                        "pool {}: dequeue waiting for a free slot",
                        self.pool_id
                    );
                    inner = self.cond.wait(inner).unwrap_or_else(|p| p.into_inner());
                }
            }
        };

        let config = inner.config.clone();
        let slot = &mut inner.slots[index];
        let existing = if secure {
            &slot.secure_handle
        } else {
            &slot.handle
        };
        let needs_alloc = match existing {
            Some(h) => !h.matches(&config, secure),
            None => true,
        };
        if needs_alloc {
            let realloc = existing.is_some();
            let handle = self.allocator.allocate(&config, secure)?;
            if secure {
                slot.secure_handle = Some(handle);
            } else {
                slot.handle = Some(handle);
            }
            inner.allocations += 1;
            if realloc {
                inner.reallocations += 1;
            }
        }

        let slot = &mut inner.slots[index];
        let handle = if secure {
            Arc::clone(slot.secure_handle.as_ref().ok_or_else(|| {
                OverblitError::allocation("secure handle missing after allocation")
            })?)
        } else {
            Arc::clone(
                slot.handle
                    .as_ref()
                    .ok_or_else(|| OverblitError::allocation("handle missing after allocation"))?,
            )
        };
        slot.state = SlotState::Dequeued;
        slot.active_secure = secure;
        let release_fence = slot.release_fence.take();

        Ok(DisplayBuffer {
            index,
            pool_id: self.pool_id,
            pitch: handle.pitch,
            format: handle.format,
            size: handle.size,
            protected: handle.protected,
            sequence: slot.sequence,
            handle,
            acquire_fence: None,
            release_fence,
            src_crop: Rect::new(0, 0, config.width as i32, config.height as i32),
            dst_crop: Rect::new(0, 0, config.width as i32, config.height as i32),
            sharpen: false,
        })
    }

    /// Producer returns a filled buffer. The embedded acquire fence and crop
    /// metadata move into the slot and the entry joins the FIFO oldest-first.
    pub fn queue_buffer(&self, mut buffer: DisplayBuffer) -> OverblitResult<()> {
        let mut inner = self.lock();
        let index = buffer.index;
        if index >= inner.slots.len() {
            return Err(OverblitError::lifecycle(format!(
                "queue_buffer: slot index {index} out of range"
            )));
        }
        if inner.slots[index].state != SlotState::Dequeued {
            let msg = format!(
                "pool {}: queue_buffer on slot {index} in state {:?}",
                self.pool_id, inner.slots[index].state
            );
            self.diag.fatal_invariant(&msg);
            return Err(OverblitError::lifecycle(msg));
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let slot = &mut inner.slots[index];
        slot.sequence = sequence;
        slot.acquire_fence = buffer.acquire_fence.take();
        slot.src_crop = buffer.src_crop;
        slot.dst_crop = buffer.dst_crop;
        slot.sharpen = buffer.sharpen;
        slot.state = SlotState::Queued;
        inner.fifo.push_back(index);
        self.cond.notify_all();
        Ok(())
    }

    /// Consumer takes the oldest queued entry. Acquire-fence ownership moves to
    /// the caller. Waits for an entry only in synchronous mode with
    /// `non_blocking` false.
    pub fn acquire_buffer(&self, non_blocking: bool) -> OverblitResult<DisplayBuffer> {
        let mut inner = self.lock();
        let index = loop {
            match inner.fifo.pop_front() {
                Some(i) => break i,
                None if non_blocking || !inner.synchronous => {
                    return Err(OverblitError::exhausted(format!(
                        "pool {}: nothing queued",
                        self.pool_id
                    )));
                }
                None => {
                    inner = self.cond.wait(inner).unwrap_or_else(|p| p.into_inner());
                }
            }
        };

        let pool_id = self.pool_id;
        let slot = &mut inner.slots[index];
        if slot.state != SlotState::Queued {
            let msg = format!(
                "pool {pool_id}: fifo entry {index} in state {:?}",
                slot.state
            );
            self.diag.fatal_invariant(&msg);
            return Err(OverblitError::lifecycle(msg));
        }
        slot.state = SlotState::Acquired;

        let handle = if slot.active_secure {
            slot.secure_handle.as_ref()
        } else {
            slot.handle.as_ref()
        }
        .map(Arc::clone)
        .ok_or_else(|| {
            OverblitError::lifecycle(format!("pool {pool_id}: acquired slot {index} has no handle"))
        })?;

        Ok(DisplayBuffer {
            index,
            pool_id,
            pitch: handle.pitch,
            format: handle.format,
            size: handle.size,
            protected: handle.protected,
            sequence: slot.sequence,
            handle,
            acquire_fence: slot.acquire_fence.take(),
            release_fence: None,
            src_crop: slot.src_crop,
            dst_crop: slot.dst_crop,
            sharpen: slot.sharpen,
        })
    }

    /// Consumer returns the slot. The release fence moves into the slot and is
    /// handed to the next producer at dequeue.
    pub fn release_buffer(&self, index: usize, fence: Option<Fence>) -> OverblitResult<()> {
        let mut inner = self.lock();
        if index >= inner.slots.len() {
            return Err(OverblitError::lifecycle(format!(
                "release_buffer: slot index {index} out of range"
            )));
        }
        if inner.slots[index].state != SlotState::Acquired {
            let msg = format!(
                "pool {}: release_buffer on slot {index} in state {:?}",
                self.pool_id, inner.slots[index].state
            );
            self.diag.fatal_invariant(&msg);
            return Err(OverblitError::lifecycle(msg));
        }
        let slot = &mut inner.slots[index];
        slot.release_fence = fence;
        slot.state = SlotState::Free;
        self.cond.notify_all();
        Ok(())
    }

    /// Abandon a Dequeued slot without queueing it. Pending fences are dropped.
    pub fn cancel_buffer(&self, index: usize) -> OverblitResult<()> {
        let mut inner = self.lock();
        if index >= inner.slots.len() {
            return Err(OverblitError::lifecycle(format!(
                "cancel_buffer: slot index {index} out of range"
            )));
        }
        if inner.slots[index].state != SlotState::Dequeued {
            let msg = format!(
                "pool {}: cancel_buffer on slot {index} in state {:?}",
                self.pool_id, inner.slots[index].state
            );
            self.diag.fatal_invariant(&msg);
            return Err(OverblitError::lifecycle(msg));
        }
        let slot = &mut inner.slots[index];
        slot.acquire_fence = None;
        slot.release_fence = None;
        slot.state = SlotState::Free;
        self.cond.notify_all();
        Ok(())
    }

    pub fn state_of(&self, index: usize) -> Option<SlotState> {
        let inner = self.lock();
        inner.slots.get(index).map(|s| s.state)
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let mut stats = QueueStats {
            slots: inner.slots.len(),
            synchronous: inner.synchronous,
            allocations: inner.allocations,
            reallocations: inner.reallocations,
            drained_on_mode_switch: inner.drained_on_mode_switch,
            ..QueueStats::default()
        };
        for slot in &inner.slots {
            match slot.state {
                SlotState::Free => stats.free += 1,
                SlotState::Dequeued => stats.dequeued += 1,
                SlotState::Queued => stats.queued += 1,
                SlotState::Acquired => stats.acquired += 1,
            }
        }
        stats
    }
}
