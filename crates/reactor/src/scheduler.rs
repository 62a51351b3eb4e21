//! Cooperative scheduler: the dirty-channel set, and a separate bounded-
//! fairness work-unit FIFO for deferred completions and timer expiries.
//!
//! There's no cross-reactor work stealing here — each reactor only ever
//! drains its own dirty set and its own work queue. A channel lands in the
//! dirty set either because its owning reactor just queued outbound bytes
//! for it, or because a producer on a different reactor delivered a
//! cross-reactor response and woke this one via [`reactor_io::Wakeup`]. A
//! handler posts a work unit when it needs to resume something later
//! without blocking the reactor thread — `tick()` runs a bounded slice of
//! them per loop iteration and reports whether more remain.

use std::sync::Arc;

use crossbeam_queue::SegQueue;

use reactor_core::ChannelId;

use crate::channel::OutboundHandle;

/// A single deferred unit of work posted onto a reactor's internal
/// run-queue — run once, on the owning reactor thread, by `tick()`.
pub type WorkUnit = Box<dyn FnOnce() + Send>;

/// Shared between the owning reactor and any thread that may hand this
/// reactor outbound work for one of its channels.
pub struct Scheduler {
    dirty: SegQueue<ChannelId>,
    work: SegQueue<WorkUnit>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            dirty: SegQueue::new(),
            work: SegQueue::new(),
        }
    }

    /// Post a work unit onto this reactor's internal run-queue. Safe to
    /// call from any thread; the unit runs on the owning reactor thread at
    /// its next `tick()`.
    pub fn post(&self, unit: WorkUnit) {
        self.work.push(unit);
    }

    /// Run up to `budget` pending work units. Returns `true` if the queue
    /// still has work left afterward (`moreWork`), so the caller knows to
    /// keep the loop from blocking on the next iteration.
    pub fn tick(&self, budget: usize) -> bool {
        for _ in 0..budget {
            match self.work.pop() {
                Some(unit) => unit(),
                None => return false,
            }
        }
        !self.work.is_empty()
    }

    /// Mark `id` dirty, unless it's already pending a flush. `outbound` is
    /// the channel's own handle, used to dedupe without a lookup into the
    /// registry (cross-thread callers may not have one).
    pub fn mark_dirty(&self, id: ChannelId, outbound: &Arc<OutboundHandle>) {
        if outbound.try_mark_queued() {
            self.dirty.push(id);
        }
    }

    /// Pop up to `budget` dirty channel ids for this tick. The caller is
    /// responsible for calling [`OutboundHandle::clear_queued`] once it has
    /// either staged the channel's writes or determined there was nothing
    /// to stage (`Channel::pump_outbound` returning `false`) — otherwise a
    /// channel marked dirty again mid-drain would be silently dropped.
    pub fn drain(&self, budget: usize, out: &mut Vec<ChannelId>) {
        for _ in 0..budget {
            match self.dirty.pop() {
                Some(id) => out.push(id),
                None => break,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_dirty_twice_without_a_drain_only_queues_once() {
        let sched = Scheduler::new();
        let outbound = Arc::new(OutboundHandle::new());
        sched.mark_dirty(ChannelId::new(3), &outbound);
        sched.mark_dirty(ChannelId::new(3), &outbound);

        let mut out = Vec::new();
        sched.drain(8, &mut out);
        assert_eq!(out, vec![ChannelId::new(3)]);
    }

    #[test]
    fn clearing_queued_allows_remarking() {
        let sched = Scheduler::new();
        let outbound = Arc::new(OutboundHandle::new());
        sched.mark_dirty(ChannelId::new(1), &outbound);
        outbound.clear_queued();
        sched.mark_dirty(ChannelId::new(1), &outbound);

        let mut out = Vec::new();
        sched.drain(8, &mut out);
        assert_eq!(out, vec![ChannelId::new(1), ChannelId::new(1)]);
    }

    #[test]
    fn drain_respects_the_fairness_budget() {
        let sched = Scheduler::new();
        for i in 0..10 {
            let outbound = Arc::new(OutboundHandle::new());
            sched.mark_dirty(ChannelId::new(i), &outbound);
        }
        let mut out = Vec::new();
        sched.drain(4, &mut out);
        assert_eq!(out.len(), 4);
        assert!(!sched.is_empty());
    }

    #[test]
    fn tick_runs_posted_work_and_reports_no_more_work_when_drained() {
        let sched = Scheduler::new();
        let ran = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            sched.post(Box::new(move || {
                ran.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }

        let more = sched.tick(8);
        assert_eq!(ran.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(!more);
    }

    #[test]
    fn tick_respects_its_budget_and_reports_more_work_pending() {
        let sched = Scheduler::new();
        let ran = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for _ in 0..5 {
            let ran = ran.clone();
            sched.post(Box::new(move || {
                ran.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }

        let more = sched.tick(2);
        assert_eq!(ran.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(more);
    }
}
