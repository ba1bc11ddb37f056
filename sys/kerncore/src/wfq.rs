// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Weighted-fair-queueing ready queue.
//!
//! Contexts are ordered by virtual deadline in a binary min-heap; the
//! context with the earliest deadline runs next. Each heap member records its
//! own slot in its `ReadyLink::Heap`, so it can be found (and removed, or
//! re-sifted after its deadline moves) without searching.
//!
//! The idle context is kept outside the heap. It is what `next_to_run`
//! returns when the heap is empty, and it inherits the deadline of the
//! context that was last running so that deadline bookkeeping stays
//! continuous across idle periods.

use sched_abi::ContextId;

use crate::{ReadyLink, WfqEntity};

/// WFQ run queue for one CPU, holding at most `SLOTS` ready contexts.
///
/// # Invariants
///
/// - `heap[..cnt]` is a min-heap by deadline: for every slot `i` and each of
///   its children `c` below `cnt`, `heap[i]` runs no later than `heap[c]`.
/// - Every `heap[i]` with `i < cnt` has the link `ReadyLink::Heap(i)`.
/// - The idle context is never in the heap.
#[derive(Clone, Debug)]
pub struct ReadyQueueWfq<const SLOTS: usize> {
    heap: [ContextId; SLOTS],
    cnt: usize,
    idle: Option<ContextId>,
    current_sched: Option<ContextId>,
}

impl<const SLOTS: usize> ReadyQueueWfq<SLOTS> {
    const SLOTS_FIT_IN_LINK: () = assert!(
        SLOTS <= u16::MAX as usize + 1,
        "heap slots are recorded as u16"
    );

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::SLOTS_FIT_IN_LINK;
        Self {
            heap: [ContextId(0); SLOTS],
            cnt: 0,
            idle: None,
            current_sched: None,
        }
    }

    /// Context most recently passed to `activate`.
    pub fn current_sched(&self) -> Option<ContextId> {
        self.current_sched
    }

    /// Records which context is actually running on this CPU. Call this
    /// right after committing to run what `next_to_run` returned; the queue
    /// uses it as its virtual clock.
    pub fn activate(&mut self, s: Option<ContextId>) {
        self.current_sched = s;
    }

    /// Installs `idle` as this CPU's idle filler. It is never placed in the
    /// heap, but counts as ready from now on.
    pub fn set_idle<E: WfqEntity>(&mut self, ctxs: &mut [E], idle: ContextId) {
        let ctx = &mut ctxs[idle.index()];
        ctx.set_ready_link(ReadyLink::Idle);
        ctx.mark_idle();
        self.idle = Some(idle);
    }

    pub fn idle(&self) -> Option<ContextId> {
        self.idle
    }

    /// Number of contexts in the heap (the idle context doesn't count).
    pub fn len(&self) -> usize {
        self.cnt
    }

    pub fn is_empty(&self) -> bool {
        self.cnt == 0
    }

    /// The heap, in storage order. Only slot 0 has a defined meaning: it
    /// holds the earliest deadline.
    pub fn heap(&self) -> &[ContextId] {
        &self.heap[..self.cnt]
    }

    /// Returns the context with the earliest deadline without removing it.
    ///
    /// If the heap is empty this returns the idle context, after copying the
    /// current context's deadline into it. Returns `None` only if the heap
    /// is empty and no idle context was installed.
    pub fn next_to_run<E: WfqEntity>(&self, ctxs: &mut [E]) -> Option<ContextId> {
        if self.cnt > 0 {
            return Some(self.heap[0]);
        }

        let idle = self.idle?;
        if let Some(cur) = self.current_sched {
            let dl = ctxs[cur.index()].deadline();
            ctxs[idle.index()].set_deadline(dl);
        }
        Some(idle)
    }

    /// Adds `id` to the heap.
    ///
    /// Does nothing if `id` is already in a ready queue. WFQ has no notion of
    /// "front", so the `is_current_sched` hint is ignored.
    ///
    /// # Panics
    ///
    /// If the heap already holds `SLOTS` contexts.
    pub fn enqueue<E: WfqEntity>(
        &mut self,
        ctxs: &mut [E],
        id: ContextId,
        _is_current_sched: bool,
    ) {
        if ctxs[id.index()].in_ready_list() {
            return;
        }

        let n = self.cnt;
        self.heap[n] = id;
        self.cnt += 1;
        ctxs[id.index()].set_ready_link(ReadyLink::Heap(n as u16));
        self.heap_up(ctxs, n);
    }

    /// Removes `id` from the heap.
    ///
    /// Does nothing if `id` isn't in the heap; in particular, the idle
    /// context can't be dequeued.
    pub fn dequeue<E: WfqEntity>(&mut self, ctxs: &mut [E], id: ContextId) {
        let ReadyLink::Heap(slot) = ctxs[id.index()].ready_link() else {
            return;
        };
        let x = usize::from(slot);

        self.cnt -= 1;
        if x != self.cnt {
            self.swap(ctxs, x, self.cnt);
            self.sift(ctxs, x);
        }
        ctxs[id.index()].set_ready_link(ReadyLink::Unlinked);
    }

    /// Restores heap order around `id` after its deadline was changed from
    /// outside, typically by the tick handler after `id` used up its
    /// quantum.
    ///
    /// If `id` isn't enqueued this enqueues it instead.
    pub fn requeue<E: WfqEntity>(&mut self, ctxs: &mut [E], id: ContextId) {
        match ctxs[id.index()].ready_link() {
            ReadyLink::Heap(slot) => self.sift(ctxs, usize::from(slot)),
            ReadyLink::Idle => (),
            _ => self.enqueue(ctxs, id, false),
        }
    }

    /// Adjusts `sc`'s fairness state as it wakes up.
    ///
    /// The deadline of the current context serves as the virtual clock. If
    /// `sc`'s deadline fell behind it while `sc` was blocked, `sc` is moved
    /// up to the clock and credited `weight` budget per unit of virtual time
    /// it missed, never more than its quantum. A context can't bank more
    /// than one quantum by sleeping, but keeps what it legitimately had.
    pub fn deblock_refill<E: WfqEntity>(&mut self, ctxs: &mut [E], sc: ContextId) {
        let da = match self.current_sched {
            Some(cur) => ctxs[cur.index()].deadline(),
            None => 0,
        };

        let ctx = &mut ctxs[sc.index()];
        let dl = ctx.deadline();
        if dl >= da {
            return;
        }

        let credit = (da - dl).saturating_mul(u64::from(ctx.weight()));
        let left = ctx.left().saturating_add(credit).min(ctx.quantum());
        ctx.set_left(left);
        ctx.set_deadline(da);
    }

    fn swap<E: WfqEntity>(&mut self, ctxs: &mut [E], a: usize, b: usize) {
        ctxs[self.heap[a].index()].set_ready_link(ReadyLink::Heap(b as u16));
        ctxs[self.heap[b].index()].set_ready_link(ReadyLink::Heap(a as u16));
        self.heap.swap(a, b);
    }

    fn runs_before<E: WfqEntity>(&self, ctxs: &[E], a: usize, b: usize) -> bool {
        ctxs[self.heap[a].index()].runs_before(&ctxs[self.heap[b].index()])
    }

    fn runs_no_later_than<E: WfqEntity>(
        &self,
        ctxs: &[E],
        a: usize,
        b: usize,
    ) -> bool {
        ctxs[self.heap[a].index()]
            .runs_no_later_than(&ctxs[self.heap[b].index()])
    }

    /// Moves the entry at slot `a` towards the root until its parent runs
    /// strictly before it.
    fn heap_up<E: WfqEntity>(&mut self, ctxs: &mut [E], mut a: usize) {
        while a > 0 {
            let p = (a - 1) / 2;
            if self.runs_before(ctxs, p, a) {
                return;
            }
            self.swap(ctxs, p, a);
            a = p;
        }
    }

    /// Moves the entry at slot `a` towards the leaves until it runs no later
    /// than its earlier child. Between equal children the right one is
    /// taken.
    fn heap_down<E: WfqEntity>(&mut self, ctxs: &mut [E], mut a: usize) {
        loop {
            let mut c = 2 * a + 1;
            let c2 = 2 * a + 2;
            if self.cnt <= c {
                return;
            }
            if self.cnt > c2 && self.runs_no_later_than(ctxs, c2, c) {
                c = c2;
            }
            if self.runs_no_later_than(ctxs, a, c) {
                return;
            }
            self.swap(ctxs, c, a);
            a = c;
        }
    }

    /// Restores heap order for an entry at slot `a` that may be out of place
    /// in either direction.
    ///
    /// An entry moved into a vacated slot comes from another subtree, so it
    /// can be earlier than its new parent as well as later than its new
    /// children.
    fn sift<E: WfqEntity>(&mut self, ctxs: &mut [E], a: usize) {
        if a > 0 && self.runs_before(ctxs, a, (a - 1) / 2) {
            self.heap_up(ctxs, a);
        } else {
            self.heap_down(ctxs, a);
        }
    }
}

impl<const SLOTS: usize> Default for ReadyQueueWfq<SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{id, TestCtx};
    use crate::Schedulable;

    type Rq = ReadyQueueWfq<16>;

    fn table(dls: &[u64]) -> Vec<TestCtx> {
        dls.iter().map(|&d| TestCtx::with_deadline(d)).collect()
    }

    fn assert_heap(rq: &Rq, ctxs: &[TestCtx]) {
        let heap = rq.heap();
        for (i, c) in heap.iter().enumerate() {
            assert_eq!(ctxs[c.index()].link, ReadyLink::Heap(i as u16));
            for child in [2 * i + 1, 2 * i + 2] {
                if let Some(k) = heap.get(child) {
                    assert!(ctxs[c.index()].dl <= ctxs[k.index()].dl);
                }
            }
        }
    }

    #[test]
    fn picks_minimum_deadline() {
        let mut ctxs = table(&[5, 1, 3, 9, 1]);
        let mut rq = Rq::new();
        for i in 0..5 {
            rq.enqueue(&mut ctxs, id(i), false);
            assert_heap(&rq, &ctxs);
        }

        let first = rq.next_to_run(&mut ctxs).unwrap();
        assert!(first == id(1) || first == id(4));
        rq.dequeue(&mut ctxs, first);
        assert_heap(&rq, &ctxs);

        let second = rq.next_to_run(&mut ctxs).unwrap();
        assert_ne!(second, first);
        assert!(second == id(1) || second == id(4));
        rq.dequeue(&mut ctxs, second);

        let order: Vec<u64> = core::iter::from_fn(|| {
            let n = rq.next_to_run(&mut ctxs)?;
            rq.dequeue(&mut ctxs, n);
            Some(ctxs[n.index()].dl)
        })
        .collect();
        assert_eq!(order, vec![3, 5, 9]);
    }

    #[test]
    fn idle_is_the_fallback() {
        let mut ctxs = table(&[0, 4]);
        let mut rq = Rq::new();
        assert_eq!(rq.next_to_run(&mut ctxs), None);

        rq.set_idle(&mut ctxs, id(0));
        assert!(ctxs[0].idle);
        assert!(ctxs[0].in_ready_list());
        assert_eq!(rq.next_to_run(&mut ctxs), Some(id(0)));

        rq.enqueue(&mut ctxs, id(1), false);
        assert_eq!(rq.next_to_run(&mut ctxs), Some(id(1)));
        assert_eq!(rq.len(), 1);
    }

    #[test]
    fn idle_inherits_current_deadline() {
        let mut ctxs = table(&[0, 42]);
        let mut rq = Rq::new();
        rq.set_idle(&mut ctxs, id(0));
        rq.activate(Some(id(1)));
        assert_eq!(rq.next_to_run(&mut ctxs), Some(id(0)));
        assert_eq!(ctxs[0].dl, 42);
    }

    #[test]
    fn idle_cannot_be_dequeued_or_enqueued() {
        let mut ctxs = table(&[0]);
        let mut rq = Rq::new();
        rq.set_idle(&mut ctxs, id(0));
        rq.dequeue(&mut ctxs, id(0));
        rq.enqueue(&mut ctxs, id(0), false);
        rq.requeue(&mut ctxs, id(0));
        assert!(rq.is_empty());
        assert_eq!(ctxs[0].link, ReadyLink::Idle);
    }

    #[test]
    fn enqueue_and_dequeue_are_idempotent() {
        let mut ctxs = table(&[3, 2]);
        let mut rq = Rq::new();
        rq.enqueue(&mut ctxs, id(0), false);
        rq.enqueue(&mut ctxs, id(1), false);
        rq.enqueue(&mut ctxs, id(1), false);
        assert_eq!(rq.len(), 2);

        rq.dequeue(&mut ctxs, id(0));
        rq.dequeue(&mut ctxs, id(0));
        assert_eq!(rq.len(), 1);
        assert_eq!(rq.next_to_run(&mut ctxs), Some(id(1)));
        assert!(!ctxs[0].in_ready_list());
    }

    #[test]
    fn requeue_after_deadline_advance() {
        let mut ctxs = table(&[1, 2, 3]);
        let mut rq = Rq::new();
        for i in 0..3 {
            rq.enqueue(&mut ctxs, id(i), false);
        }
        assert_eq!(rq.next_to_run(&mut ctxs), Some(id(0)));

        ctxs[0].dl = 10;
        rq.requeue(&mut ctxs, id(0));
        assert_heap(&rq, &ctxs);
        assert_eq!(rq.next_to_run(&mut ctxs), Some(id(1)));
    }

    #[test]
    fn requeue_of_unqueued_enqueues() {
        let mut ctxs = table(&[7]);
        let mut rq = Rq::new();
        rq.requeue(&mut ctxs, id(0));
        assert_eq!(rq.next_to_run(&mut ctxs), Some(id(0)));
    }

    #[test]
    fn removal_from_one_subtree_keeps_the_other_ordered() {
        // Build heap [1, 10, 2, 11, 12, 3] and take out 11: the last entry
        // (3) lands under 10 and has to move up.
        let mut ctxs = table(&[1, 10, 2, 11, 12, 3]);
        let mut rq = Rq::new();
        for i in 0..6 {
            rq.enqueue(&mut ctxs, id(i), false);
        }
        assert_eq!(
            rq.heap().iter().map(|c| c.index()).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4, 5]
        );
        rq.dequeue(&mut ctxs, id(3));
        assert_heap(&rq, &ctxs);
    }

    #[test]
    fn deblock_refill_catches_up_to_clock() {
        let mut ctxs = table(&[20, 10]);
        ctxs[1].weight = 3;
        ctxs[1].quantum = 1000;
        ctxs[1].left = 5;
        let mut rq = Rq::new();
        rq.activate(Some(id(0)));

        rq.deblock_refill(&mut ctxs, id(1));
        assert_eq!(ctxs[1].dl, 20);
        assert_eq!(ctxs[1].left, 5 + 10 * 3);
    }

    #[test]
    fn deblock_refill_caps_at_quantum() {
        let mut ctxs = table(&[20, 10]);
        ctxs[1].weight = 50;
        ctxs[1].quantum = 100;
        ctxs[1].left = 40;
        let mut rq = Rq::new();
        rq.activate(Some(id(0)));

        rq.deblock_refill(&mut ctxs, id(1));
        assert_eq!(ctxs[1].dl, 20);
        assert_eq!(ctxs[1].left, 100);
    }

    #[test]
    fn deblock_refill_leaves_punctual_contexts_alone() {
        let mut ctxs = table(&[20, 25]);
        ctxs[1].left = 3;
        let mut rq = Rq::new();
        rq.activate(Some(id(0)));
        rq.deblock_refill(&mut ctxs, id(1));
        assert_eq!((ctxs[1].dl, ctxs[1].left), (25, 3));

        // With nothing current the clock reads zero.
        rq.activate(None);
        ctxs[1].dl = 0;
        rq.deblock_refill(&mut ctxs, id(1));
        assert_eq!((ctxs[1].dl, ctxs[1].left), (0, 3));
    }

    #[test]
    #[should_panic]
    fn overfull_heap_panics() {
        let mut ctxs = table(&[1, 2, 3]);
        let mut rq = ReadyQueueWfq::<2>::new();
        for i in 0..3 {
            rq.enqueue(&mut ctxs, id(i), false);
        }
    }
}
