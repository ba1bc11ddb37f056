// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-context scheduling state.

use sched_abi::{Priority, SchedClass, SchedError};
use sched_kerncore::{FixedPrioEntity, ReadyLink, Schedulable, WfqEntity};

use crate::kconfig::{DEFAULT_PRIO, DEFAULT_TIME_SLICE};

/// Which ready queue a context belongs in.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Policy {
    FixedPrio,
    Wfq,
}

/// Scheduling state of one context: its class, tunables, remaining budget
/// and ready-queue link.
///
/// The thread that owns this is someone else's business. The ready queues
/// reach a `SchedContext` only through its index in the kernel's context
/// table.
#[derive(Clone, Debug)]
pub struct SchedContext {
    policy: Policy,
    prio: Priority,
    /// Budget granted per timeslice.
    quantum: u64,
    /// Budget remaining in the current timeslice.
    left: u64,
    link: ReadyLink,

    // Only meaningful under `Policy::Wfq`.
    deadline: u64,
    weight: u32,
    /// Virtual time one full quantum is worth: `quantum / weight`.
    quantum_per_weight: u64,
    idle: bool,
}

impl SchedContext {
    /// Creates a fixed-priority context with the configured default priority
    /// and a full default timeslice.
    pub const fn new() -> Self {
        Self {
            policy: Policy::FixedPrio,
            prio: Priority(DEFAULT_PRIO),
            quantum: DEFAULT_TIME_SLICE,
            left: DEFAULT_TIME_SLICE,
            link: ReadyLink::Unlinked,
            deadline: 0,
            weight: 0,
            quantum_per_weight: 0,
            idle: false,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn prio(&self) -> Priority {
        self.prio
    }

    pub fn quantum(&self) -> u64 {
        self.quantum
    }

    pub fn left(&self) -> u64 {
        self.left
    }

    pub fn set_left(&mut self, left: u64) {
        self.left = left;
    }

    pub fn deadline(&self) -> u64 {
        self.deadline
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn in_ready_list(&self) -> bool {
        self.link.is_linked()
    }

    /// Checks that `class` would be accepted by [`SchedContext::set`],
    /// without changing anything.
    pub fn validate(class: &SchedClass) -> Result<(), SchedError> {
        if let SchedClass::Wfq { weight, quantum } = *class {
            if quantum == 0 || weight == 0 {
                return Err(SchedError::InvalidParameter);
            }
            u32::try_from(weight).map_err(|_| SchedError::OutOfRange)?;
        }
        Ok(())
    }

    /// Applies user-supplied scheduling parameters.
    ///
    /// Fixed-priority priorities above 255 are clamped, and a zero quantum
    /// selects the default timeslice. WFQ needs a non-zero weight and
    /// quantum, and takes priority 0.
    ///
    /// On error the context is left unchanged.
    ///
    /// # Panics
    ///
    /// If the context is in a ready queue: its class and priority decide
    /// which bucket or heap it sits in, so it must be dequeued first.
    pub fn set(&mut self, class: &SchedClass) -> Result<(), SchedError> {
        if self.in_ready_list() {
            panic!();
        }
        Self::validate(class)?;

        match *class {
            SchedClass::FixedPrio { prio, quantum } => {
                self.policy = Policy::FixedPrio;
                self.prio = Priority::saturating_from(prio);
                self.quantum = if quantum == 0 {
                    DEFAULT_TIME_SLICE
                } else {
                    quantum as u64
                };
            }
            SchedClass::Wfq { weight, quantum } => {
                let weight =
                    u32::try_from(weight).map_err(|_| SchedError::OutOfRange)?;
                let quantum = quantum as u64;

                self.policy = Policy::Wfq;
                self.prio = Priority::KERNEL;
                self.quantum = quantum;
                self.weight = weight;
                self.quantum_per_weight = quantum / u64::from(weight);
            }
        }
        Ok(())
    }

    /// Turns this context into its CPU's idle filler: a WFQ context at
    /// priority 0 that is never in the heap.
    pub(crate) fn make_idle(&mut self) {
        self.policy = Policy::Wfq;
        self.prio = Priority::KERNEL;
        self.idle = true;
    }

    /// Checks whether `self`, if it were running, should keep the CPU rather
    /// than yield to `other`.
    ///
    /// A fixed-priority context dominates anything of strictly lower
    /// priority, WFQ contexts included (they sit at priority 0). A WFQ
    /// context never dominates a fixed-priority one, the idle context never
    /// dominates anything, and between WFQ contexts the earlier deadline
    /// wins.
    pub fn dominates(&self, other: &Self) -> bool {
        if self.policy == Policy::FixedPrio {
            return self.prio.is_more_important_than(other.prio);
        }
        if self.idle || other.policy == Policy::FixedPrio {
            return false;
        }
        self.deadline < other.deadline
    }

    /// Refills the budget for a new timeslice. A WFQ context pays for it by
    /// moving its deadline one weighted quantum into the future.
    pub fn replenish(&mut self) {
        self.left = self.quantum;
        if self.policy == Policy::Wfq {
            self.deadline = self.deadline.saturating_add(self.quantum_per_weight);
        }
    }
}

impl Default for SchedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedulable for SchedContext {
    fn ready_link(&self) -> ReadyLink {
        self.link
    }

    fn set_ready_link(&mut self, link: ReadyLink) {
        self.link = link;
    }
}

impl FixedPrioEntity for SchedContext {
    fn priority(&self) -> Priority {
        self.prio
    }

    fn set_priority(&mut self, prio: Priority) {
        self.prio = prio;
    }
}

impl WfqEntity for SchedContext {
    fn deadline(&self) -> u64 {
        self.deadline
    }

    fn set_deadline(&mut self, dl: u64) {
        self.deadline = dl;
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
