// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel-independent core of the per-CPU ready queues.
//!
//! This crate holds the two scheduling policies as plain data structures:
//!
//! - [`ReadyQueueFp`]: fixed priority, O(1) for every operation, built from
//!   256 FIFO buckets and a [`HierarchicalBitmap`] of non-empty buckets.
//! - [`ReadyQueueWfq`]: weighted fair queueing, a binary min-heap keyed by
//!   virtual deadline, O(log n), with an idle context as the fallback.
//!
//! Neither queue owns the contexts it schedules. Each operation is handed the
//! context table (`&mut [E]`) and the `ContextId` of the context to work on,
//! and each context records where it sits through its [`ReadyLink`]. The
//! exact context type is left to the kernel; the queues only need the
//! accessors in [`Schedulable`], [`FixedPrioEntity`] and [`WfqEntity`]. This
//! keeps the queues testable on the host with toy context types.
//!
//! Nothing in here locks, allocates or blocks. Each queue belongs to one CPU
//! and must only be touched by that CPU with preemption disabled; enforcing
//! that is the caller's job.

// Allow std-y things to be used in test. Note that this attribute is a bit of a
// trap for the programmer, because rust-analyzer by default seems to build
// things with test set. This means it's easy to introduce code incompatible
// with no_std without your editor hassling you about it. Beware.
#![cfg_attr(not(test), no_std)]
#![forbid(clippy::wildcard_imports)]

mod bitmap;
mod fp;
mod wfq;

pub use bitmap::{HierarchicalBitmap, PrioBitmap};
pub use fp::{BucketIter, ReadyQueueFp};
pub use wfq::ReadyQueueWfq;

use sched_abi::{ContextId, Priority};

/// Where a context currently sits in the ready queues.
///
/// A context is in at most one queue at a time, and this enum is what makes
/// that so: there is exactly one link per context, and it names either a
/// position in a fixed-priority bucket, a slot in the WFQ heap, or the WFQ
/// idle position.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ReadyLink {
    /// Not in any ready queue.
    #[default]
    Unlinked,
    /// Member of a fixed-priority bucket, which is a circular doubly-linked
    /// list. A sole member is its own neighbour on both sides.
    Bucket { next: ContextId, prev: ContextId },
    /// Occupies this slot of the WFQ heap.
    Heap(u16),
    /// The WFQ idle context. It's never in the heap, but always counts as
    /// ready.
    Idle,
}

impl ReadyLink {
    pub fn is_linked(self) -> bool {
        self != Self::Unlinked
    }
}

/// Access to the ready-queue link stored in a context.
pub trait Schedulable {
    fn ready_link(&self) -> ReadyLink;
    fn set_ready_link(&mut self, link: ReadyLink);

    /// Checks whether this context is in any ready queue.
    #[inline(always)]
    fn in_ready_list(&self) -> bool {
        self.ready_link().is_linked()
    }
}

/// Contexts that can be scheduled by fixed priority.
///
/// The priority of a context must not change while it is enqueued; dequeue
/// it, change it, enqueue it again.
pub trait FixedPrioEntity: Schedulable {
    fn priority(&self) -> Priority;
    fn set_priority(&mut self, prio: Priority);
}

/// Contexts that can be scheduled by weighted fair queueing.
///
/// The provided ordering methods compare contexts by virtual deadline only;
/// a smaller deadline means the context should run sooner.
pub trait WfqEntity: Schedulable {
    /// Virtual deadline.
    fn deadline(&self) -> u64;
    fn set_deadline(&mut self, dl: u64);
    /// Share of the CPU relative to other WFQ contexts.
    fn weight(&self) -> u32;
    /// Cap on the budget this context may bank.
    fn quantum(&self) -> u64;
    /// Budget remaining before the next deadline bump.
    fn left(&self) -> u64;
    fn set_left(&mut self, left: u64);
    /// Marks this context as its CPU's idle context.
    fn mark_idle(&mut self);

    /// `self <= other` in deadline order.
    #[inline(always)]
    fn runs_no_later_than(&self, other: &Self) -> bool {
        self.deadline() <= other.deadline()
    }

    /// `self < other` in deadline order.
    #[inline(always)]
    fn runs_before(&self, other: &Self) -> bool {
        self.deadline() < other.deadline()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Toy context carrying just what the queues look at.
    #[derive(Clone, Debug, Default)]
    pub struct TestCtx {
        pub prio: u8,
        pub link: ReadyLink,
        pub dl: u64,
        pub weight: u32,
        pub quantum: u64,
        pub left: u64,
        pub idle: bool,
    }

    impl TestCtx {
        pub fn with_prio(prio: u8) -> Self {
            Self {
                prio,
                ..Self::default()
            }
        }

        pub fn with_deadline(dl: u64) -> Self {
            Self {
                dl,
                weight: 1,
                quantum: 100,
                ..Self::default()
            }
        }
    }

    impl Schedulable for TestCtx {
        fn ready_link(&self) -> ReadyLink {
            self.link
        }
        fn set_ready_link(&mut self, link: ReadyLink) {
            self.link = link;
        }
    }

    impl FixedPrioEntity for TestCtx {
        fn priority(&self) -> Priority {
            Priority(self.prio)
        }
        fn set_priority(&mut self, prio: Priority) {
            self.prio = prio.0;
        }
    }

    impl WfqEntity for TestCtx {
        fn deadline(&self) -> u64 {
            self.dl
        }
        fn set_deadline(&mut self, dl: u64) {
            self.dl = dl;
        }
        fn weight(&self) -> u32 {
            self.weight
        }
        fn quantum(&self) -> u64 {
            self.quantum
        }
        fn left(&self) -> u64 {
            self.left
        }
        fn set_left(&mut self, left: u64) {
            self.left = left;
        }
        fn mark_idle(&mut self) {
            self.idle = true;
        }
    }

    pub fn id(i: usize) -> ContextId {
        ContextId::for_index(i)
    }
}
