// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-CPU state, and choosing which CPU a context runs on.

use core::ops::{Index, IndexMut};

use sched_abi::{ContextId, CpuNumber, CpuSet, SchedClass, SchedError};

use crate::context::SchedContext;
use crate::kconfig::MAX_CPUS;
use crate::queue::ReadyQueue;
use crate::time::TimesliceTimer;

/// One `T` for each CPU the kernel was configured for.
#[derive(Clone, Debug)]
pub struct PerCpu<T> {
    cpus: [T; MAX_CPUS],
}

impl<T> PerCpu<T> {
    /// Builds the per-CPU instances by calling `f` with each CPU number in
    /// turn.
    pub fn new(mut f: impl FnMut(CpuNumber) -> T) -> Self {
        Self {
            cpus: core::array::from_fn(|i| f(CpuNumber(i as u32))),
        }
    }

    /// Number of CPUs, which is also one past the highest CPU number.
    pub const fn max(&self) -> CpuNumber {
        CpuNumber(MAX_CPUS as u32)
    }

    pub fn get(&self, cpu: CpuNumber) -> Option<&T> {
        self.cpus.get(cpu.index())
    }

    pub fn get_mut(&mut self, cpu: CpuNumber) -> Option<&mut T> {
        self.cpus.get_mut(cpu.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (CpuNumber, &T)> {
        self.cpus
            .iter()
            .enumerate()
            .map(|(i, t)| (CpuNumber(i as u32), t))
    }

    /// Gets mutable references to two different CPUs' instances at once.
    ///
    /// # Panics
    ///
    /// If `a == b`, or either is out of range.
    pub fn pair_mut(&mut self, a: CpuNumber, b: CpuNumber) -> (&mut T, &mut T) {
        let (a, b) = (a.index(), b.index());
        if a == b {
            panic!();
        }
        if a < b {
            let (lo, hi) = self.cpus.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.cpus.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }
}

impl<T: Default> Default for PerCpu<T> {
    fn default() -> Self {
        Self::new(|_| T::default())
    }
}

/// Accesses a CPU's instance.
///
/// # Panics
///
/// If `cpu` is not below `MAX_CPUS`.
impl<T> Index<CpuNumber> for PerCpu<T> {
    type Output = T;

    fn index(&self, cpu: CpuNumber) -> &T {
        &self.cpus[cpu.index()]
    }
}

impl<T> IndexMut<CpuNumber> for PerCpu<T> {
    fn index_mut(&mut self, cpu: CpuNumber) -> &mut T {
        &mut self.cpus[cpu.index()]
    }
}

/// Chooses the CPU a context should run on after its scheduling parameters
/// name the CPU set `cpus`.
///
/// The context stays on its `home` CPU if that is online and in the set.
/// Failing that it goes to the `current` CPU (the one handling the request)
/// if that is in the set, and failing that to the first CPU in the set that
/// `present` accepts. Returns `None` if the set names no usable CPU at all.
pub fn target_cpu(
    cpus: CpuSet,
    home: CpuNumber,
    current: CpuNumber,
    online: impl Fn(CpuNumber) -> bool,
    present: impl Fn(CpuNumber) -> bool,
) -> Option<CpuNumber> {
    if online(home) && cpus.contains(home) {
        return Some(home);
    }
    if cpus.contains(current) {
        return Some(current);
    }

    let max = CpuNumber(MAX_CPUS as u32);
    let first = cpus.first(present, max);
    if first < max {
        Some(first)
    } else {
        None
    }
}

/// Moves `sc` from CPU `from`'s ready queues to CPU `to`'s.
///
/// A context that wasn't ready on `from` isn't made ready on `to` either; it
/// will be enqueued there when it next wakes up. Returns whether it was
/// moved.
pub fn migrate(
    rqs: &mut PerCpu<ReadyQueue>,
    ctxs: &mut [SchedContext],
    sc: ContextId,
    from: CpuNumber,
    to: CpuNumber,
) -> bool {
    if from == to || !ctxs[sc.index()].in_ready_list() {
        return false;
    }

    let (src, dst) = rqs.pair_mut(from, to);
    if src.current_sched() == Some(sc) {
        src.invalidate_sched();
    }
    src.dequeue(ctxs, sc);
    dst.enqueue(ctxs, sc, false);
    true
}

/// Applies new scheduling parameters to `sc` on the CPU that owns `rq`.
///
/// The context starts over with a full budget under its new class. If it
/// was ready it goes back in ahead of its new equals, and if its timeslice
/// is the current one that timeslice is reloaded through `timer`.
///
/// On error nothing changes. The idle context can't be reconfigured and
/// gets `InvalidParameter`.
pub fn reconfigure(
    rq: &mut ReadyQueue,
    ctxs: &mut [SchedContext],
    sc: ContextId,
    class: &SchedClass,
    timer: &mut impl TimesliceTimer,
) -> Result<(), SchedError> {
    if ctxs[sc.index()].is_idle() {
        return Err(SchedError::InvalidParameter);
    }
    SchedContext::validate(class)?;

    let was_ready = ctxs[sc.index()].in_ready_list();
    rq.ready_dequeue(ctxs, sc);

    let ctx = &mut ctxs[sc.index()];
    ctx.set(class)?;
    ctx.replenish();

    if rq.current_sched() == Some(sc) {
        // Don't let the old timeslice's leftovers overwrite the fresh budget.
        rq.invalidate_sched();
        rq.set_current_sched(ctxs, sc, timer);
    }
    if was_ready {
        rq.ready_enqueue(ctxs, sc);
    }
    Ok(())
}
