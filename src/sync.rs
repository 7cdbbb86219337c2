//! Software fence timeline.
//!
//! Retire and release fences of the composition pipeline are plain points on
//! a monotonically increasing counter: the frame N fence signals once the
//! timeline reaches N. [`SyncTimeline`] is the producer side owned by the
//! display, [`SyncFence`] the waitable consumer side handed to clients.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

#[derive(Debug)]
struct Inner {
    value: Mutex<u64>,
    cond: Condvar,
}

impl Inner {
    fn signal_up_to(&self, point: u64) -> bool {
        let mut value = self.value.lock().unwrap();
        // Requests that do not advance the timeline are no-ops, signaled
        // fences never become unsignaled.
        if point <= *value {
            return false;
        }
        *value = point;
        self.cond.notify_all();
        true
    }
}

/// A monotonically increasing fence timeline.
///
/// Dropping the timeline force-signals every fence created from it, so no
/// consumer blocks on a producer that went away.
#[derive(Debug)]
pub struct SyncTimeline {
    inner: Arc<Inner>,
    next_point: u64,
}

impl SyncTimeline {
    /// A fresh timeline at point zero with no outstanding fences.
    pub fn new() -> SyncTimeline {
        SyncTimeline {
            inner: Arc::new(Inner {
                value: Mutex::new(0),
                cond: Condvar::new(),
            }),
            next_point: 0,
        }
    }

    /// Reserves the next point and returns the fence that signals once the
    /// timeline reaches it.
    pub fn create_next_fence(&mut self) -> SyncFence {
        self.next_point += 1;
        trace!(point = self.next_point, "created timeline fence");
        SyncFence {
            point: self.next_point,
            kind: FenceKind::Timeline(self.inner.clone()),
        }
    }

    /// Signals all outstanding fences up to and including `point`.
    ///
    /// Idempotent; a `point` at or behind the current one changes nothing.
    pub fn increase_to_point(&self, point: u64) {
        if self.inner.signal_up_to(point) {
            trace!(point, "timeline advanced");
        }
    }

    /// The highest signaled point.
    pub fn current_point(&self) -> u64 {
        *self.inner.value.lock().unwrap()
    }
}

impl Default for SyncTimeline {
    fn default() -> SyncTimeline {
        SyncTimeline::new()
    }
}

impl Drop for SyncTimeline {
    fn drop(&mut self) {
        self.inner.signal_up_to(self.next_point);
    }
}

#[derive(Debug, Clone)]
enum FenceKind {
    Timeline(Arc<Inner>),
    Merged(Arc<(SyncFence, SyncFence)>),
}

/// A waitable point on a [`SyncTimeline`], or the conjunction of two fences.
#[derive(Debug, Clone)]
pub struct SyncFence {
    point: u64,
    kind: FenceKind,
}

impl SyncFence {
    /// One fence that signals once both inputs have signaled.
    ///
    /// The merged fence reports the later of the two points.
    pub fn merge(a: SyncFence, b: SyncFence) -> SyncFence {
        SyncFence {
            point: a.point.max(b.point),
            kind: FenceKind::Merged(Arc::new((a, b))),
        }
    }

    /// The timeline point this fence waits for.
    pub fn point(&self) -> u64 {
        self.point
    }

    /// Whether the fence has signaled.
    pub fn is_signaled(&self) -> bool {
        match &self.kind {
            FenceKind::Timeline(inner) => *inner.value.lock().unwrap() >= self.point,
            FenceKind::Merged(pair) => pair.0.is_signaled() && pair.1.is_signaled(),
        }
    }

    /// Blocks until the fence signals.
    pub fn wait(&self) {
        match &self.kind {
            FenceKind::Timeline(inner) => {
                let mut value = inner.value.lock().unwrap();
                while *value < self.point {
                    value = inner.cond.wait(value).unwrap();
                }
            }
            FenceKind::Merged(pair) => {
                pair.0.wait();
                pair.1.wait();
            }
        }
    }

    /// Blocks until the fence signals or `timeout` elapses.
    ///
    /// Returns whether the fence signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        match &self.kind {
            FenceKind::Timeline(inner) => {
                let mut value = inner.value.lock().unwrap();
                while *value < self.point {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                        return false;
                    };
                    let (guard, _) = inner.cond.wait_timeout(value, remaining).unwrap();
                    value = guard;
                }
                true
            }
            FenceKind::Merged(pair) => {
                let first = pair
                    .0
                    .wait_timeout(deadline.saturating_duration_since(Instant::now()));
                first
                    && pair
                        .1
                        .wait_timeout(deadline.saturating_duration_since(Instant::now()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fences_signal_in_timeline_order() {
        let mut timeline = SyncTimeline::new();
        let first = timeline.create_next_fence();
        let second = timeline.create_next_fence();
        let third = timeline.create_next_fence();
        assert!(!first.is_signaled());

        timeline.increase_to_point(2);
        assert!(first.is_signaled());
        assert!(second.is_signaled());
        assert!(!third.is_signaled());
        assert_eq!(timeline.current_point(), 2);
    }

    #[test]
    fn non_forward_requests_are_noops() {
        let mut timeline = SyncTimeline::new();
        let fence = timeline.create_next_fence();
        drop(fence);
        for _ in 0..4 {
            timeline.create_next_fence();
        }

        timeline.increase_to_point(5);
        timeline.increase_to_point(3);
        assert_eq!(timeline.current_point(), 5);
        timeline.increase_to_point(5);
        assert_eq!(timeline.current_point(), 5);
    }

    #[test]
    fn merged_fence_needs_both_inputs() {
        let mut a = SyncTimeline::new();
        let mut b = SyncTimeline::new();
        let merged = SyncFence::merge(a.create_next_fence(), b.create_next_fence());

        assert!(!merged.is_signaled());
        a.increase_to_point(1);
        assert!(!merged.is_signaled());
        assert!(!merged.wait_timeout(Duration::from_millis(10)));
        b.increase_to_point(1);
        assert!(merged.is_signaled());
        merged.wait();
    }

    #[test]
    fn dropping_the_timeline_unblocks_waiters() {
        let mut timeline = SyncTimeline::new();
        let fence = timeline.create_next_fence();

        let waiter = thread::spawn(move || fence.wait());
        thread::sleep(Duration::from_millis(10));
        drop(timeline);
        waiter.join().unwrap();
    }

    #[test]
    fn wait_returns_immediately_on_signaled_fence() {
        let mut timeline = SyncTimeline::new();
        let fence = timeline.create_next_fence();
        timeline.increase_to_point(1);
        fence.wait();
        assert!(fence.wait_timeout(Duration::ZERO));
    }
}
