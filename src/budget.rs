//! Per-transaction span admission control.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Started and dropped span counts at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpanCounts {
    pub started: usize,
    pub dropped: usize,
}

/// Bounds the number of spans one transaction records.
///
/// `started` never exceeds `max`; every rejected admission increments
/// `dropped` and leaves `started` untouched.
#[derive(Debug)]
pub struct SpanBudget {
    max: usize,
    started: AtomicUsize,
    dropped: AtomicUsize,
}

impl SpanBudget {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            started: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Try to admit one more span. On `false` the caller must not record it.
    pub fn try_admit(&self) -> bool {
        let admitted = self
            .started
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |started| {
                (started < self.max).then_some(started + 1)
            })
            .is_ok();

        if !admitted {
            let dropped = self.dropped.fetch_add(1, Ordering::AcqRel) + 1;
            if dropped == 1 {
                tracing::debug!(max = self.max, "span budget exhausted, dropping further spans");
            }
        }
        admitted
    }

    pub fn snapshot(&self) -> SpanCounts {
        SpanCounts {
            started: self.started.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
        }
    }
}
