use std::sync::Arc;

use overblit::{
    BufferQueueConfig, BufferSlotQueue, DiagRing, OverblitError, PixelFormat, SlotState,
    SystemAllocator, fence,
};

/// fd-accounting assertions require that no other test is creating or closing
/// fds concurrently; every test takes this lock.
fn serial() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|p| p.into_inner())
}

fn fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .expect("proc fd dir")
        .count()
}

fn queue_1080p() -> BufferSlotQueue {
    BufferSlotQueue::new(
        1,
        3,
        BufferQueueConfig::new(1920, 1080, PixelFormat::Rgba8888),
        Arc::new(SystemAllocator::new()),
        Arc::new(DiagRing::new(32)),
    )
}

fn one_cycle(q: &BufferSlotQueue) {
    let mut buf = q.dequeue_buffer(true, false).expect("dequeue");
    buf.acquire_fence = Some(fence::signalled_fence().expect("acquire fence"));
    q.queue_buffer(buf).expect("queue");
    let got = q.acquire_buffer(true).expect("acquire");
    let index = got.index;
    drop(got);
    q.release_buffer(index, Some(fence::signalled_fence().expect("release fence")))
        .expect("release");
}

#[test]
fn thousand_cycles_hold_fd_count_flat() {
    let _guard = serial();
    let q = queue_1080p();

    // Warmup allocates the slot's backing buffer.
    one_cycle(&q);
    let baseline = fd_count();

    for _ in 0..1000 {
        one_cycle(&q);
    }

    assert_eq!(fd_count(), baseline, "cycling must not accumulate fds");
    assert_eq!(q.state_of(0), Some(SlotState::Free));
    let stats = q.stats();
    assert_eq!(stats.allocations, 1, "one slot, allocated once");
    assert_eq!(stats.free, 3);
}

#[test]
fn mode_switch_closes_pending_fences_and_empties_fifo() {
    let _guard = serial();
    let q = queue_1080p();
    q.set_synchronous_mode(false);

    let mut first = q.dequeue_buffer(true, false).expect("dequeue first");
    let mut second = q.dequeue_buffer(true, false).expect("dequeue second");

    let baseline = fd_count();
    first.acquire_fence = Some(fence::signalled_fence().expect("fence"));
    second.acquire_fence = Some(fence::signalled_fence().expect("fence"));
    assert_eq!(fd_count(), baseline + 2);

    q.queue_buffer(first).expect("queue first");
    q.queue_buffer(second).expect("queue second");
    assert_eq!(q.stats().queued, 2);

    q.set_synchronous_mode(true);

    assert_eq!(fd_count(), baseline, "both pending fences must be closed");
    let stats = q.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.free, 3);
    assert!(matches!(
        q.acquire_buffer(true),
        Err(OverblitError::Exhausted(_))
    ));
}

#[test]
fn fences_move_exactly_once_through_a_cycle() {
    let _guard = serial();
    let q = queue_1080p();

    let mut buf = q.dequeue_buffer(true, false).expect("dequeue");
    assert!(buf.release_fence.is_none(), "fresh slot has no release fence");

    let (acquire, signaller) = fence::fence_pair().expect("pair");
    buf.acquire_fence = Some(acquire);
    let index = buf.index;
    q.queue_buffer(buf).expect("queue");

    // The consumer receives the producer's fence, unsignalled until the
    // producer fires it.
    let got = q.acquire_buffer(true).expect("acquire");
    let fence_view = got.acquire_fence.as_ref().expect("fence travels");
    assert!(!fence_view.is_signalled());
    signaller.signal().expect("signal");
    assert!(fence_view.is_signalled());
    drop(got);

    q.release_buffer(index, Some(fence::signalled_fence().expect("fence")))
        .expect("release");

    // The release fence surfaces at the next dequeue of the same slot.
    let next = q.dequeue_buffer(true, false).expect("dequeue again");
    assert_eq!(next.index, index);
    assert!(next.release_fence.expect("release fence").is_signalled());
}

#[test]
fn secure_dequeue_allocates_a_separate_protected_buffer() {
    let _guard = serial();
    let q = queue_1080p();

    let normal = q.dequeue_buffer(true, false).expect("normal");
    assert!(!normal.protected);
    let index = normal.index;
    q.queue_buffer(normal).expect("queue");
    let got = q.acquire_buffer(true).expect("acquire");
    drop(got);
    q.release_buffer(index, None).expect("release");

    let secure = q.dequeue_buffer(true, true).expect("secure");
    assert!(secure.protected);
    assert_eq!(secure.index, index, "same slot, protected allocation path");
    assert_eq!(q.stats().allocations, 2);
}
