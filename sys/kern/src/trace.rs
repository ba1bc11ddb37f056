// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduling trace events.

use sched_abi::{ContextId, Priority};

/// Number of events each CPU's trace ring retains.
pub const TRACE_DEPTH: usize = 16;

/// A timeslice bookkeeping event, as recorded in a ready queue's trace ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedEvent {
    /// Placeholder for slots that haven't been written.
    None,
    /// The outgoing context's remaining budget was saved (or, if its
    /// timeslice had run out, refilled).
    Save {
        ctx: ContextId,
        prio: Priority,
        left: u64,
        quantum: u64,
    },
    /// A context's timeslice was loaded and its timeout armed.
    Load {
        ctx: ContextId,
        prio: Priority,
        left: u64,
        quantum: u64,
    },
    /// The current timeslice was dropped without saving, so the next
    /// scheduling decision must load a fresh one.
    Invalidate,
}
