// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The combined per-CPU ready queue.
//!
//! Each CPU has one fixed-priority queue and one WFQ queue, and a context is
//! in the one its `Policy` selects. The fixed-priority queue strictly
//! preempts WFQ: WFQ contexts (and the idle context, which is a WFQ context)
//! only run when no fixed-priority context is ready.
//!
//! Besides dispatching queue operations to the right policy, this tracks
//! which context's timeslice is *current* on the CPU, which is what the
//! end-of-timeslice timer counts down.

use ringbuf::{ringbuf_entry, Ringbuf, RingbufEntry};
use sched_abi::{ContextId, Priority};
use sched_kerncore::{ReadyQueueFp, ReadyQueueWfq};

use crate::context::{Policy, SchedContext};
use crate::kconfig::WFQ_HEAP_SLOTS;
use crate::time::TimesliceTimer;
use crate::trace::{SchedEvent, TRACE_DEPTH};

/// One CPU's ready queues plus its current timeslice.
///
/// All operations take the kernel's context table and identify contexts by
/// index. The caller must hold this CPU with preemption disabled.
#[derive(Clone, Debug)]
pub struct ReadyQueue {
    fp: ReadyQueueFp,
    wfq: ReadyQueueWfq<WFQ_HEAP_SLOTS>,
    current_sched: Option<ContextId>,
    trace: Ringbuf<SchedEvent, TRACE_DEPTH>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            fp: ReadyQueueFp::new(),
            wfq: ReadyQueueWfq::new(),
            current_sched: None,
            trace: Ringbuf::new(SchedEvent::None),
        }
    }

    /// Context whose timeslice is currently loaded, if any.
    pub fn current_sched(&self) -> Option<ContextId> {
        self.current_sched
    }

    /// Installs `sc` as this CPU's idle context. It becomes a WFQ context at
    /// priority 0 and is what runs when nothing else is ready.
    pub fn set_idle(&mut self, ctxs: &mut [SchedContext], sc: ContextId) {
        ctxs[sc.index()].make_idle();
        self.wfq.set_idle(ctxs, sc);
    }

    /// Picks the context that should run next, without removing it.
    ///
    /// Fixed-priority contexts come first; WFQ is only consulted when the
    /// fixed-priority queue is empty. Returns `None` only if nothing is
    /// ready and no idle context was installed.
    pub fn next_to_run(&self, ctxs: &mut [SchedContext]) -> Option<ContextId> {
        self.fp.next_to_run().or_else(|| self.wfq.next_to_run(ctxs))
    }

    /// Makes `s` the current timeslice, without touching the timer. The WFQ
    /// queue only follows WFQ contexts, whose deadlines it uses as its
    /// virtual clock.
    pub fn activate(&mut self, ctxs: &[SchedContext], s: Option<ContextId>) {
        let tracks_wfq = match s {
            None => true,
            Some(id) => ctxs[id.index()].policy() == Policy::Wfq,
        };
        if tracks_wfq {
            self.wfq.activate(s);
        }
        self.current_sched = s;
    }

    /// Drops the current timeslice, so that the next scheduling decision
    /// loads a fresh one through `set_current_sched`.
    pub fn invalidate_sched(&mut self) {
        self.wfq.activate(None);
        self.current_sched = None;
        ringbuf_entry!(self.trace, SchedEvent::Invalidate);
    }

    pub fn enqueue(
        &mut self,
        ctxs: &mut [SchedContext],
        sc: ContextId,
        is_current_sched: bool,
    ) {
        match ctxs[sc.index()].policy() {
            Policy::FixedPrio => self.fp.enqueue(ctxs, sc, is_current_sched),
            Policy::Wfq => self.wfq.enqueue(ctxs, sc, is_current_sched),
        }
    }

    pub fn dequeue(&mut self, ctxs: &mut [SchedContext], sc: ContextId) {
        match ctxs[sc.index()].policy() {
            Policy::FixedPrio => self.fp.dequeue(ctxs, sc),
            Policy::Wfq => self.wfq.dequeue(ctxs, sc),
        }
    }

    /// Puts `sc` back in line after its timeslice ran out. The caller must
    /// already have refilled its budget (see `SchedContext::replenish`).
    pub fn requeue(&mut self, ctxs: &mut [SchedContext], sc: ContextId) {
        match ctxs[sc.index()].policy() {
            Policy::FixedPrio => self.fp.requeue(ctxs, sc),
            Policy::Wfq => self.wfq.requeue(ctxs, sc),
        }
    }

    pub fn deblock_refill(&mut self, ctxs: &mut [SchedContext], sc: ContextId) {
        match ctxs[sc.index()].policy() {
            Policy::FixedPrio => self.fp.deblock_refill(ctxs, sc),
            Policy::Wfq => self.wfq.deblock_refill(ctxs, sc),
        }
    }

    /// Makes `sc` ready, ahead of its equals, unless it already is.
    pub fn ready_enqueue(&mut self, ctxs: &mut [SchedContext], sc: ContextId) {
        if ctxs[sc.index()].in_ready_list() {
            return;
        }
        self.enqueue(ctxs, sc, true);
    }

    /// Removes `sc` from the ready queues if it's in them.
    pub fn ready_dequeue(&mut self, ctxs: &mut [SchedContext], sc: ContextId) {
        if !ctxs[sc.index()].in_ready_list() {
            return;
        }
        self.dequeue(ctxs, sc);
    }

    /// Hands the CPU over from scheduling context `from` to `to`, for
    /// example when a thread donates its timeslice across an IPC call.
    ///
    /// If `from` was the current timeslice it is invalidated, so the next
    /// scheduling decision loads `to`'s.
    pub fn switch_sched(
        &mut self,
        ctxs: &mut [SchedContext],
        from: ContextId,
        to: ContextId,
    ) {
        if self.current_sched == Some(from) {
            self.invalidate_sched();
        }

        self.ready_dequeue(ctxs, from);
        self.enqueue(ctxs, to, false);
    }

    /// Handles `sc` becoming runnable on this CPU.
    ///
    /// `crs` is the scheduling context of whatever is running right now.
    /// Returns `true` if the caller should reschedule, which is the case when
    /// neither the current timeslice nor `crs` dominates `sc`.
    ///
    /// If `lazy_q` is set and a reschedule is due, `sc` is *not* enqueued:
    /// the caller is about to switch to it directly. Otherwise `sc` ends up
    /// in the ready queues.
    #[must_use]
    pub fn deblock(
        &mut self,
        ctxs: &mut [SchedContext],
        sc: ContextId,
        crs: Option<ContextId>,
        lazy_q: bool,
    ) -> bool {
        let cs = self.current_sched;
        let resched = if cs == Some(sc) {
            !dominated(ctxs, crs, sc)
        } else {
            self.deblock_refill(ctxs, sc);
            !(dominated(ctxs, cs, sc) || dominated(ctxs, crs, sc))
        };

        if resched && lazy_q {
            return true;
        }

        self.ready_enqueue(ctxs, sc);
        resched
    }

    /// Loads `sc`'s timeslice.
    ///
    /// The outgoing timeslice, if any, keeps whatever time the timer says it
    /// had left; if that has run out it gets a fresh budget instead. The
    /// timer is then armed for the end of `sc`'s remaining budget.
    pub fn set_current_sched(
        &mut self,
        ctxs: &mut [SchedContext],
        sc: ContextId,
        timer: &mut impl TimesliceTimer,
    ) {
        let now = timer.now();

        if let Some(s) = self.current_sched {
            let prev = &mut ctxs[s.index()];
            match u64::try_from(timer.remaining(now)) {
                Ok(left) if left > 0 => prev.set_left(left),
                _ => prev.replenish(),
            }
            ringbuf_entry!(
                self.trace,
                SchedEvent::Save {
                    ctx: s,
                    prio: prev.prio(),
                    left: prev.left(),
                    quantum: prev.quantum(),
                }
            );
        }

        let next = &ctxs[sc.index()];
        timer.arm(now.saturating_add(next.left()));
        ringbuf_entry!(
            self.trace,
            SchedEvent::Load {
                ctx: sc,
                prio: next.prio(),
                left: next.left(),
                quantum: next.quantum(),
            }
        );

        self.activate(ctxs, Some(sc));
    }

    /// Iterates over the fixed-priority contexts ready at `prio`, in the
    /// order they'll run.
    pub fn iter_fp<'a>(
        &self,
        ctxs: &'a [SchedContext],
        prio: Priority,
    ) -> impl Iterator<Item = ContextId> + 'a {
        self.fp.iter_bucket(ctxs, prio)
    }

    /// The ready WFQ contexts, in heap order. The first one (if any) has the
    /// earliest deadline; the rest are in no particular order. The idle
    /// context isn't included.
    pub fn iter_wfq(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.wfq.heap().iter().copied()
    }

    pub fn fp(&self) -> &ReadyQueueFp {
        &self.fp
    }

    pub fn wfq(&self) -> &ReadyQueueWfq<WFQ_HEAP_SLOTS> {
        &self.wfq
    }

    /// Recent timeslice events on this CPU, oldest first.
    pub fn trace(&self) -> impl Iterator<Item = &RingbufEntry<SchedEvent>> {
        self.trace.iter()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks whether `by`, if there is one, dominates `sc`.
fn dominated(
    ctxs: &[SchedContext],
    by: Option<ContextId>,
    sc: ContextId,
) -> bool {
    match by {
        Some(by) => ctxs[by.index()].dominates(&ctxs[sc.index()]),
        None => false,
    }
}
