// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel side of the scheduler.
//!
//! This joins the two policy queues from `sched-kerncore` into the per-CPU
//! [`ReadyQueue`] that the context-switch path, the wake-up path and the
//! timer tick talk to, and supplies the concrete scheduling context they
//! operate on.
//!
//! # Design principles
//!
//! 1. Static configuration. CPU count, default priority and timeslice, and
//!    WFQ heap capacity are fixed when the kernel is built (see `build.rs`
//!    and the `SCHED_KCONFIG` variable).
//! 2. No allocation and no locking. Every structure is sized at build time,
//!    and each CPU's queue is only touched by that CPU with preemption
//!    disabled.
//! 3. Contexts are named by index. The queues never hold references into
//!    the context table; every operation is handed the table.
//! 4. The things this doesn't own (threads, the timer hardware, IPIs) are
//!    reached through narrow seams like [`TimesliceTimer`], so the whole
//!    scheduler runs in host tests.

#![cfg_attr(not(test), no_std)]
#![forbid(clippy::wildcard_imports)]

pub mod context;
pub mod percpu;
pub mod queue;
pub mod time;
pub mod trace;

/// Build-time scheduler configuration.
pub mod kconfig {
    include!(concat!(env!("OUT_DIR"), "/kconfig.rs"));
}

pub use context::{Policy, SchedContext};
pub use percpu::{migrate, reconfigure, target_cpu, PerCpu};
pub use queue::ReadyQueue;
pub use time::{TimesliceTimer, Timestamp};
pub use trace::SchedEvent;
