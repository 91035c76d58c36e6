/// Immutable pipeline configuration, constructed once at startup and shared by
/// reference into each component. There is no ambient global state in this crate;
/// anything that used to be a device singleton lives here.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CompositorConfig {
    /// Number of reusable slots per output buffer queue.
    pub queue_slots: usize,
    /// Advisory blit execution margin subtracted from the next-vsync estimate
    /// when computing the backend deadline hint, in nanoseconds.
    pub blit_margin_ns: u64,
    /// Force a blit for every hardware-composited layer, dirty or not.
    pub debug_always_blit: bool,
    /// Capacity of the diagnostic ring buffer flushed on fatal errors.
    pub diag_ring_capacity: usize,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            // Triple buffering between the blit engine and the overlay stage.
            // Sustained blocking in dequeue signals a backpressure bug upstream,
            // not an undersized pool.
            queue_slots: 3,
            blit_margin_ns: 4_000_000,
            debug_always_blit: false,
            diag_ring_capacity: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_is_triple_buffered() {
        assert_eq!(CompositorConfig::default().queue_slots, 3);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = CompositorConfig {
            queue_slots: 4,
            blit_margin_ns: 1,
            debug_always_blit: true,
            diag_ring_capacity: 8,
        };
        let s = serde_json::to_string(&cfg).unwrap();
        let back: CompositorConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back.queue_slots, 4);
        assert!(back.debug_always_blit);
    }
}
