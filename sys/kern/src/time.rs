// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler time and the timeslice timer seam.

/// In-kernel timestamp representation.
///
/// This is measured in the same unit as quanta (microseconds by convention),
/// since a timeslice ends at "now plus remaining budget".
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Returns the timestamp `ticks` later than `self`, pinned at the end of
    /// time rather than wrapping.
    pub fn saturating_add(self, ticks: u64) -> Self {
        Self(self.0.saturating_add(ticks))
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<[u32; 2]> for Timestamp {
    fn from(v: [u32; 2]) -> Self {
        Self::from(u64::from(v[0]) | u64::from(v[1]) << 32)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

/// The per-CPU end-of-timeslice timeout, as seen by the ready queue.
///
/// The timer subsystem owns the real timeout and fires the tick handler when
/// it expires; the ready queue only needs to read the clock, ask how much of
/// the armed timeslice is left, and re-arm it when switching contexts.
pub trait TimesliceTimer {
    /// Current value of the system clock.
    fn now(&self) -> Timestamp;

    /// Time from `now` until the armed timeout fires. Zero or negative if it
    /// has already passed, or if nothing is armed.
    fn remaining(&self, now: Timestamp) -> i64;

    /// Cancels any armed timeout and arms a new one for `deadline`.
    fn arm(&mut self, deadline: Timestamp);
}

/// Host stand-in for the timeslice timeout, with a clock the test moves by
/// hand.
#[cfg(test)]
pub(crate) mod fake {
    use super::{TimesliceTimer, Timestamp};

    #[derive(Debug, Default)]
    pub struct FakeTimer {
        pub now: u64,
        pub armed: Option<u64>,
    }

    impl FakeTimer {
        pub fn advance(&mut self, ticks: u64) {
            self.now += ticks;
        }
    }

    impl TimesliceTimer for FakeTimer {
        fn now(&self) -> Timestamp {
            Timestamp::from(self.now)
        }

        fn remaining(&self, now: Timestamp) -> i64 {
            match self.armed {
                Some(deadline) => deadline as i64 - u64::from(now) as i64,
                None => 0,
            }
        }

        fn arm(&mut self, deadline: Timestamp) {
            self.armed = Some(deadline.into());
        }
    }
}
