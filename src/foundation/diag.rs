use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded ring of recent diagnostic lines.
///
/// Components record short breadcrumbs here (slot transitions that were refused,
/// jobs that failed validation). When a lifecycle invariant is found broken the
/// ring is flushed through `tracing::error` so the last moments before the abort
/// are visible in the log.
#[derive(Debug)]
pub struct DiagRing {
    inner: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl DiagRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append one line, evicting the oldest when full.
    pub fn record(&self, line: impl Into<String>) {
        let line = line.into();
        let mut ring = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.capacity == 0 {
            return;
        }
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(line);
    }

    /// Emit every retained line through `tracing::error`, oldest first.
    pub fn flush(&self) {
        let ring = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        for line in ring.iter() {
            tracing::error!(target: "overblit::diag", "{line}");
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Report a broken resource-lifecycle invariant.
    ///
    /// The invariants in the data model are load-bearing: once one is violated,
    /// shared kernel resources may already be corrupted, so production builds
    /// flush the ring and abort. Debug and test builds downgrade to an error log
    /// and let the caller surface a typed `Lifecycle` error instead.
    pub fn fatal_invariant(&self, msg: &str) {
        self.record(msg.to_owned());
        if cfg!(debug_assertions) {
            tracing::error!(target: "overblit::diag", "invariant violated (downgraded): {msg}");
        } else {
            tracing::error!(target: "overblit::diag", "invariant violated, aborting: {msg}");
            self.flush();
            std::process::abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded_and_evicts_oldest() {
        let ring = DiagRing::new(2);
        ring.record("a");
        ring.record("b");
        ring.record("c");
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn zero_capacity_ring_records_nothing() {
        let ring = DiagRing::new(0);
        ring.record("a");
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn fatal_invariant_is_downgraded_under_test() {
        // debug_assertions are on for the test profile, so this must return.
        let ring = DiagRing::new(4);
        ring.fatal_invariant("slot 0: queue_buffer while Free");
        assert_eq!(ring.len(), 1);
    }
}
