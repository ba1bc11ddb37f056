// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-priority ready queue.

use sched_abi::{ContextId, Priority};

use crate::{FixedPrioEntity, PrioBitmap, ReadyLink};

/// Fixed-priority run queue for one CPU.
///
/// Every priority level has a circular FIFO of ready contexts, threaded
/// through the contexts' `ReadyLink::Bucket` links; `heads[p]` is the next
/// context to run at priority `p`. A bitmap records which levels are
/// non-empty so the most important level is found in constant time.
///
/// # Invariants
///
/// - `bmap` bit `p` is set iff `heads[p]` is `Some`.
/// - `highest` names the most important non-empty level. When the queue is
///   empty it names `Priority::KERNEL`, whose bucket is then also empty.
#[derive(Clone, Debug)]
pub struct ReadyQueueFp {
    heads: [Option<ContextId>; Priority::LEVELS],
    bmap: PrioBitmap,
    highest: Priority,
}

impl ReadyQueueFp {
    pub const fn new() -> Self {
        Self {
            heads: [None; Priority::LEVELS],
            bmap: PrioBitmap::new(),
            highest: Priority::KERNEL,
        }
    }

    /// Installs `idle` as this CPU's idle context: it gets the kernel-idle
    /// priority and is enqueued, so it runs whenever nothing else is ready.
    ///
    /// Call this once, before anything else is enqueued.
    pub fn set_idle<E: FixedPrioEntity>(
        &mut self,
        ctxs: &mut [E],
        idle: ContextId,
    ) {
        ctxs[idle.index()].set_priority(Priority::KERNEL);
        self.enqueue(ctxs, idle, false);
    }

    /// Adds `id` to the bucket for its priority. If `is_current_sched` is
    /// set, it goes to the front (it was just running and keeps its turn);
    /// otherwise to the back.
    ///
    /// Does nothing if `id` is already in a ready queue.
    pub fn enqueue<E: FixedPrioEntity>(
        &mut self,
        ctxs: &mut [E],
        id: ContextId,
        is_current_sched: bool,
    ) {
        let ctx = &ctxs[id.index()];
        if ctx.in_ready_list() {
            return;
        }
        let prio = ctx.priority();

        if prio.is_more_important_than(self.highest) {
            self.highest = prio;
        }

        match self.heads[prio.index()] {
            None => {
                ctxs[id.index()].set_ready_link(ReadyLink::Bucket {
                    next: id,
                    prev: id,
                });
                self.heads[prio.index()] = Some(id);
                self.bmap.set(prio.index());
            }
            Some(head) => {
                // The tail of a circular list is just before its head, so
                // inserting before the head appends.
                let (_, tail) = links(ctxs, head);
                ctxs[id.index()].set_ready_link(ReadyLink::Bucket {
                    next: head,
                    prev: tail,
                });
                set_next(ctxs, tail, id);
                set_prev(ctxs, head, id);
                if is_current_sched {
                    self.heads[prio.index()] = Some(id);
                }
            }
        }
    }

    /// Removes `id` from its bucket.
    ///
    /// Does nothing if `id` isn't in a fixed-priority bucket.
    pub fn dequeue<E: FixedPrioEntity>(&mut self, ctxs: &mut [E], id: ContextId) {
        let ReadyLink::Bucket { next, prev } = ctxs[id.index()].ready_link()
        else {
            return;
        };
        let prio = ctxs[id.index()].priority();

        if next == id {
            // Sole member; the bucket is now empty.
            self.heads[prio.index()] = None;
            self.bmap.clear(prio.index());
            self.highest = self
                .bmap
                .find_highest_bit()
                .map_or(Priority::KERNEL, |b| Priority(b as u8));
        } else {
            set_next(ctxs, prev, next);
            set_prev(ctxs, next, prev);
            if self.heads[prio.index()] == Some(id) {
                self.heads[prio.index()] = Some(next);
            }
        }

        ctxs[id.index()].set_ready_link(ReadyLink::Unlinked);
    }

    /// Returns the context that should run next, without removing it, or
    /// `None` if nothing is ready.
    #[inline]
    pub fn next_to_run(&self) -> Option<ContextId> {
        self.heads[self.highest.index()]
    }

    /// Rotates `id`'s bucket so that `id` is last in line, for round-robin
    /// among equals when a quantum expires. The circular order of the other
    /// members is unchanged.
    ///
    /// If `id` isn't enqueued this enqueues it at the back instead.
    pub fn requeue<E: FixedPrioEntity>(&mut self, ctxs: &mut [E], id: ContextId) {
        match ctxs[id.index()].ready_link() {
            ReadyLink::Bucket { next, .. } => {
                let prio = ctxs[id.index()].priority();
                self.heads[prio.index()] = Some(next);
            }
            _ => self.enqueue(ctxs, id, false),
        }
    }

    /// Fixed priority keeps no fairness state, so there's nothing to refill
    /// when a context wakes up.
    #[inline(always)]
    pub fn deblock_refill<E: FixedPrioEntity>(
        &mut self,
        _ctxs: &mut [E],
        _id: ContextId,
    ) {
    }

    /// Most important non-empty priority, or `None` if nothing is ready.
    pub fn highest(&self) -> Option<Priority> {
        self.heads[self.highest.index()].map(|_| self.highest)
    }

    pub fn is_empty(&self) -> bool {
        self.bmap.is_empty()
    }

    /// Read-only view of the non-empty-bucket bitmap.
    pub fn bitmap(&self) -> &PrioBitmap {
        &self.bmap
    }

    /// Iterates over the contexts at `prio` in the order they will run.
    pub fn iter_bucket<'a, E: FixedPrioEntity>(
        &self,
        ctxs: &'a [E],
        prio: Priority,
    ) -> BucketIter<'a, E> {
        let head = self.heads[prio.index()];
        BucketIter {
            ctxs,
            head,
            cursor: head,
        }
    }
}

impl Default for ReadyQueueFp {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over one priority bucket, front to back.
pub struct BucketIter<'a, E> {
    ctxs: &'a [E],
    head: Option<ContextId>,
    cursor: Option<ContextId>,
}

impl<E: FixedPrioEntity> Iterator for BucketIter<'_, E> {
    type Item = ContextId;

    fn next(&mut self) -> Option<ContextId> {
        let id = self.cursor?;
        let (next, _) = links(self.ctxs, id);
        self.cursor = if Some(next) == self.head {
            None
        } else {
            Some(next)
        };
        Some(id)
    }
}

/// Reads the bucket neighbours of `id` as `(next, prev)`.
///
/// # Panics
///
/// If `id` isn't in a bucket, which means the bucket lists are corrupt.
fn links<E: FixedPrioEntity>(ctxs: &[E], id: ContextId) -> (ContextId, ContextId) {
    match ctxs[id.index()].ready_link() {
        ReadyLink::Bucket { next, prev } => (next, prev),
        _ => panic!(),
    }
}

fn set_next<E: FixedPrioEntity>(ctxs: &mut [E], id: ContextId, next: ContextId) {
    let (_, prev) = links(ctxs, id);
    ctxs[id.index()].set_ready_link(ReadyLink::Bucket { next, prev });
}

fn set_prev<E: FixedPrioEntity>(ctxs: &mut [E], id: ContextId, prev: ContextId) {
    let (next, _) = links(ctxs, id);
    ctxs[id.index()].set_ready_link(ReadyLink::Bucket { next, prev });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{id, TestCtx};
    use crate::Schedulable;

    fn table(prios: &[u8]) -> Vec<TestCtx> {
        prios.iter().map(|&p| TestCtx::with_prio(p)).collect()
    }

    fn bucket(rq: &ReadyQueueFp, ctxs: &[TestCtx], p: u8) -> Vec<usize> {
        rq.iter_bucket(ctxs, Priority(p)).map(|c| c.index()).collect()
    }

    #[test]
    fn empty_queue_has_nothing_to_run() {
        let rq = ReadyQueueFp::new();
        assert_eq!(rq.next_to_run(), None);
        assert_eq!(rq.highest(), None);
        assert!(rq.is_empty());
    }

    #[test]
    fn highest_priority_wins_then_falls_back() {
        // D(50), A(200), B(100), C(100)
        let mut ctxs = table(&[50, 200, 100, 100]);
        let (d, a, b, c) = (id(0), id(1), id(2), id(3));
        let mut rq = ReadyQueueFp::new();
        for x in [d, a, b, c] {
            rq.enqueue(&mut ctxs, x, false);
        }

        assert_eq!(rq.next_to_run(), Some(a));
        rq.dequeue(&mut ctxs, a);
        assert_eq!(rq.next_to_run(), Some(b));
        rq.dequeue(&mut ctxs, b);
        assert_eq!(rq.next_to_run(), Some(c));
        rq.dequeue(&mut ctxs, c);
        assert_eq!(rq.next_to_run(), Some(d));
        rq.dequeue(&mut ctxs, d);
        assert_eq!(rq.next_to_run(), None);
        assert!(rq.is_empty());
    }

    #[test]
    fn fifo_within_priority() {
        let mut ctxs = table(&[7, 7, 7]);
        let mut rq = ReadyQueueFp::new();
        for i in 0..3 {
            rq.enqueue(&mut ctxs, id(i), false);
        }
        assert_eq!(rq.next_to_run(), Some(id(0)));
        assert_eq!(bucket(&rq, &ctxs, 7), vec![0, 1, 2]);
    }

    #[test]
    fn current_sched_goes_to_front() {
        let mut ctxs = table(&[7, 7, 7]);
        let mut rq = ReadyQueueFp::new();
        rq.enqueue(&mut ctxs, id(0), false);
        rq.enqueue(&mut ctxs, id(1), false);
        rq.enqueue(&mut ctxs, id(2), true);
        assert_eq!(bucket(&rq, &ctxs, 7), vec![2, 0, 1]);
        assert_eq!(rq.next_to_run(), Some(id(2)));
    }

    #[test]
    fn round_robin_by_requeue() {
        let mut ctxs = table(&[9, 9]);
        let (a, b) = (id(0), id(1));
        let mut rq = ReadyQueueFp::new();
        rq.enqueue(&mut ctxs, a, false);
        rq.enqueue(&mut ctxs, b, false);

        assert_eq!(rq.next_to_run(), Some(a));
        rq.requeue(&mut ctxs, a);
        assert_eq!(rq.next_to_run(), Some(b));
        rq.requeue(&mut ctxs, b);
        assert_eq!(rq.next_to_run(), Some(a));
    }

    #[test]
    fn requeue_of_unqueued_appends() {
        let mut ctxs = table(&[9, 9]);
        let mut rq = ReadyQueueFp::new();
        rq.enqueue(&mut ctxs, id(0), false);
        rq.requeue(&mut ctxs, id(1));
        assert_eq!(bucket(&rq, &ctxs, 9), vec![0, 1]);
    }

    #[test]
    fn enqueue_and_dequeue_are_idempotent() {
        let mut ctxs = table(&[3, 3]);
        let mut rq = ReadyQueueFp::new();
        rq.enqueue(&mut ctxs, id(0), false);
        rq.enqueue(&mut ctxs, id(1), false);
        rq.enqueue(&mut ctxs, id(0), true);
        assert_eq!(bucket(&rq, &ctxs, 3), vec![0, 1]);

        rq.dequeue(&mut ctxs, id(1));
        rq.dequeue(&mut ctxs, id(1));
        assert_eq!(bucket(&rq, &ctxs, 3), vec![0]);
        assert!(!ctxs[1].in_ready_list());
        assert!(rq.bitmap().is_set(3));
    }

    #[test]
    fn dequeue_from_middle_and_head() {
        let mut ctxs = table(&[5, 5, 5, 5]);
        let mut rq = ReadyQueueFp::new();
        for i in 0..4 {
            rq.enqueue(&mut ctxs, id(i), false);
        }
        rq.dequeue(&mut ctxs, id(2));
        assert_eq!(bucket(&rq, &ctxs, 5), vec![0, 1, 3]);
        rq.dequeue(&mut ctxs, id(0));
        assert_eq!(bucket(&rq, &ctxs, 5), vec![1, 3]);
        assert_eq!(rq.next_to_run(), Some(id(1)));
    }

    #[test]
    fn bitmap_follows_buckets() {
        let mut ctxs = table(&[0, 64, 64, 255]);
        let mut rq = ReadyQueueFp::new();
        for i in 0..4 {
            rq.enqueue(&mut ctxs, id(i), false);
        }
        for p in [0, 64, 255] {
            assert!(rq.bitmap().is_set(p));
        }
        rq.dequeue(&mut ctxs, id(1));
        assert!(rq.bitmap().is_set(64));
        rq.dequeue(&mut ctxs, id(2));
        assert!(!rq.bitmap().is_set(64));
        assert_eq!(rq.highest(), Some(Priority(255)));
        rq.dequeue(&mut ctxs, id(3));
        assert_eq!(rq.highest(), Some(Priority(0)));
    }

    #[test]
    fn idle_runs_when_nothing_else_is_ready() {
        let mut ctxs = table(&[200, 10]);
        let mut rq = ReadyQueueFp::new();
        rq.set_idle(&mut ctxs, id(0));
        assert_eq!(ctxs[0].prio, 0);
        assert_eq!(rq.next_to_run(), Some(id(0)));

        rq.enqueue(&mut ctxs, id(1), false);
        assert_eq!(rq.next_to_run(), Some(id(1)));
        rq.dequeue(&mut ctxs, id(1));
        assert_eq!(rq.next_to_run(), Some(id(0)));
    }

    #[test]
    fn dequeue_ignores_heap_members() {
        let mut ctxs = table(&[4]);
        ctxs[0].link = ReadyLink::Heap(0);
        let mut rq = ReadyQueueFp::new();
        rq.dequeue(&mut ctxs, id(0));
        assert_eq!(ctxs[0].link, ReadyLink::Heap(0));
        rq.enqueue(&mut ctxs, id(0), false);
        assert!(rq.is_empty());
    }
}
