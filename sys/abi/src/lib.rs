// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler ABI definitions, shared between the kernel and the code that
//! configures scheduling contexts on behalf of user programs.
//!
//! This covers the things that cross the user/kernel boundary: priorities,
//! CPU affinity sets, and the `sched_param` family of structures that select
//! a scheduling class and its tunables. The ready queues themselves never
//! look at a CPU set; that's the business of whoever places a context on a
//! CPU.

#![cfg_attr(not(test), no_std)]

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Number of bits in a machine word, which is also the number of CPUs a
/// single `CpuSet` bitmap can name.
pub const WORD_BITS: u32 = usize::BITS;

/// Names a scheduling context by its index in the kernel's context table.
///
/// Ready queues link contexts together using these indices rather than
/// pointers, so a stale link can at worst name the wrong context, never
/// freed memory.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct ContextId(pub u16);

impl ContextId {
    /// Fabricates a `ContextId` for a table index.
    ///
    /// # Panics
    ///
    /// If `index` doesn't fit in the ID. Context tables are sized at build
    /// time, so this indicates a kernel bug.
    pub fn for_index(index: usize) -> Self {
        match u16::try_from(index) {
            Ok(i) => Self(i),
            Err(_) => panic!(),
        }
    }

    /// Extracts the table index of this ID.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Fixed scheduling priority of a context.
///
/// Numerically *higher* priorities are more important: priority 255 preempts
/// everything, and priority 0 is reserved for the per-CPU idle context.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// so that code has to say `is_more_important_than` instead of relying on
/// the reader remembering which direction `>` points.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Priority of the kernel's idle context.
    pub const KERNEL: Self = Self(0);
    /// Most important priority.
    pub const MAX: Self = Self(u8::MAX);
    /// Number of distinct priority levels.
    pub const LEVELS: usize = 256;

    /// Checks if `self` is strictly more important than `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }

    /// Converts a raw user-supplied priority, clamping anything out of range
    /// to `Priority::MAX`.
    pub fn saturating_from(raw: usize) -> Self {
        Self(u8::try_from(raw).unwrap_or(u8::MAX))
    }

    /// Index of this priority's bucket in a per-priority table.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u8> for Priority {
    fn from(p: u8) -> Self {
        Self(p)
    }
}

/// Logical CPU number.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct CpuNumber(pub u32);

impl CpuNumber {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Describes the window of CPUs that a `CpuSet` bitmap covers.
///
/// The word packs two fields:
///
/// - bits 24..32: the *granularity*, the log2 of how many consecutive CPUs
///   each bitmap bit stands for (capped at 24).
/// - bits 0..24: the *offset*, the first CPU covered by bit 0. The offset is
///   always aligned down to the granularity.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(transparent)]
pub struct CpuSetDescr(pub usize);

impl CpuSetDescr {
    const MAX_GRANULARITY: u32 = 24;
    const OFFSET_MASK: usize = 0x00ff_ffff;

    /// Builds a descriptor from its two fields. `granularity` is capped at 24
    /// and `offset` is truncated to 24 bits.
    pub fn new(offset: u32, granularity: u32) -> Self {
        let g = granularity.min(Self::MAX_GRANULARITY) as usize;
        Self((g << 24) | (offset as usize & Self::OFFSET_MASK))
    }

    /// Number of CPUs per bitmap bit, as a power of two.
    pub fn granularity(self) -> u32 {
        let g = ((self.0 >> 24) & 0xff) as u32;
        g.min(Self::MAX_GRANULARITY)
    }

    /// First CPU covered by the set.
    pub fn offset(self) -> CpuNumber {
        let raw = (self.0 & Self::OFFSET_MASK) as u32;
        CpuNumber(raw & !((1u32 << self.granularity()) - 1))
    }

    /// Computes the bitmap of present CPUs inside this descriptor's window,
    /// in this descriptor's granularity. This backs the scheduler `info`
    /// operation, which tells user code which CPUs it can name.
    ///
    /// `present` is consulted for each CPU number below `max`.
    pub fn present_map(
        self,
        present: impl Fn(CpuNumber) -> bool,
        max: CpuNumber,
    ) -> Result<usize, SchedError> {
        let g = self.granularity();
        let offset = u64::from(self.offset().0);
        let max = u64::from(max.0);
        if offset >= max {
            return Err(SchedError::OutOfRange);
        }

        let window = u64::from(WORD_BITS) << g;
        let end = max.min(offset + window);

        let mut map = 0usize;
        for i in 0..(end - offset) {
            // end is bounded by max, which came from a u32.
            if present(CpuNumber((offset + i) as u32)) {
                map |= 1 << (i >> g);
            }
        }
        Ok(map)
    }
}

/// A set of CPUs, as passed in by user code to restrict where a context may
/// run.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct CpuSet {
    pub descr: CpuSetDescr,
    pub map: usize,
}

impl CpuSet {
    /// A set naming every CPU from 0 up to `WORD_BITS - 1`.
    pub const ALL_LOW: Self = Self {
        descr: CpuSetDescr(0),
        map: usize::MAX,
    };

    /// Bitmap bit covering `cpu`, if `cpu` falls inside the window.
    fn bit_for(self, cpu: CpuNumber) -> Option<u32> {
        let offset = self.descr.offset();
        if offset > cpu {
            return None;
        }
        let b = (cpu.0 - offset.0) >> self.descr.granularity();
        if b >= WORD_BITS {
            None
        } else {
            Some(b)
        }
    }

    /// Checks whether `cpu` is a member of this set.
    pub fn contains(self, cpu: CpuNumber) -> bool {
        match self.bit_for(cpu) {
            Some(b) => (self.map >> b) & 1 != 0,
            None => false,
        }
    }

    /// Finds the lowest-numbered CPU below `max` that is in this set and
    /// accepted by `online`. Returns `max` if there is none.
    pub fn first(
        self,
        online: impl Fn(CpuNumber) -> bool,
        max: CpuNumber,
    ) -> CpuNumber {
        let g = self.descr.granularity();
        let offset = self.descr.offset().0;
        let mut cpu = offset;

        while cpu < max.0 {
            let b = (cpu - offset) >> g;
            if b >= WORD_BITS {
                break;
            }
            if (self.map >> b) & 1 == 0 {
                // Skip the rest of this granule.
                match offset.checked_add((b + 1) << g) {
                    Some(next) => cpu = next,
                    None => break,
                }
                continue;
            }
            if online(CpuNumber(cpu)) {
                return CpuNumber(cpu);
            }
            cpu += 1;
        }
        max
    }
}

/// Common prefix of every `sched_param` structure.
///
/// A non-negative `sched_class` means the structure is really a
/// `SchedParamLegacy`, whose priority overlays this field. A negative class
/// selects one of the class-specific layouts, and `length` gives its size in
/// bytes.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct SchedParamHeader {
    pub cpus: CpuSet,
    pub sched_class: isize,
    pub length: usize,
}

/// Pre-class parameter layout: fixed priority, selected by a non-negative
/// class word.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct SchedParamLegacy {
    pub cpus: CpuSet,
    pub prio: isize,
    pub quantum: usize,
}

/// Fixed-priority parameters.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct SchedParamFixedPrio {
    pub header: SchedParamHeader,
    pub prio: usize,
    pub quantum: usize,
}

impl SchedParamFixedPrio {
    pub const CLASS: isize = -1;

    pub fn new(cpus: CpuSet, prio: usize, quantum: usize) -> Self {
        Self {
            header: SchedParamHeader {
                cpus,
                sched_class: Self::CLASS,
                length: core::mem::size_of::<Self>(),
            },
            prio,
            quantum,
        }
    }
}

/// Weighted-fair-queueing parameters.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct SchedParamWfq {
    pub header: SchedParamHeader,
    pub quantum: usize,
    pub weight: usize,
}

impl SchedParamWfq {
    pub const CLASS: isize = -2;

    pub fn new(cpus: CpuSet, weight: usize, quantum: usize) -> Self {
        Self {
            header: SchedParamHeader {
                cpus,
                sched_class: Self::CLASS,
                length: core::mem::size_of::<Self>(),
            },
            quantum,
            weight,
        }
    }
}

const WORD: usize = core::mem::size_of::<usize>();
const_assert_eq!(core::mem::size_of::<CpuSet>(), 2 * WORD);
const_assert_eq!(core::mem::size_of::<SchedParamHeader>(), 4 * WORD);
const_assert_eq!(core::mem::size_of::<SchedParamLegacy>(), 4 * WORD);
const_assert_eq!(core::mem::size_of::<SchedParamFixedPrio>(), 6 * WORD);
const_assert_eq!(core::mem::size_of::<SchedParamWfq>(), 6 * WORD);

/// Scheduling class and tunables, decoded from a `sched_param` structure.
///
/// Values are carried through raw; range handling (priority clamping,
/// default quanta, rejecting zero weights) is the kernel's job when it
/// applies them to a context.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SchedClass {
    /// Fixed priority, from either the legacy or the class-tagged layout.
    FixedPrio { prio: usize, quantum: usize },
    /// Weighted fair queueing.
    Wfq { weight: usize, quantum: usize },
}

/// A fully decoded `sched_param`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SchedParams {
    pub cpus: CpuSet,
    pub class: SchedClass,
}

impl SchedParams {
    /// Decodes a `sched_param` structure from the bytes supplied by user
    /// code.
    ///
    /// Fails with `InvalidParameter` if the bytes are too short for the
    /// header, for the declared `length`, or for the selected class; and with
    /// `OutOfRange` if the class is negative but unknown.
    pub fn decode(bytes: &[u8]) -> Result<Self, SchedError> {
        let (header, _) = SchedParamHeader::read_from_prefix(bytes)
            .map_err(|_| SchedError::InvalidParameter)?;

        if header.sched_class >= 0 {
            let (p, _) = SchedParamLegacy::read_from_prefix(bytes)
                .map_err(|_| SchedError::InvalidParameter)?;
            return Ok(Self {
                cpus: p.cpus,
                class: SchedClass::FixedPrio {
                    prio: p.prio as usize,
                    quantum: p.quantum,
                },
            });
        }

        if header.length > bytes.len() {
            return Err(SchedError::InvalidParameter);
        }

        let class = match header.sched_class {
            SchedParamFixedPrio::CLASS => {
                let (p, _) = SchedParamFixedPrio::read_from_prefix(bytes)
                    .map_err(|_| SchedError::InvalidParameter)?;
                SchedClass::FixedPrio {
                    prio: p.prio,
                    quantum: p.quantum,
                }
            }
            SchedParamWfq::CLASS => {
                let (p, _) = SchedParamWfq::read_from_prefix(bytes)
                    .map_err(|_| SchedError::InvalidParameter)?;
                SchedClass::Wfq {
                    weight: p.weight,
                    quantum: p.quantum,
                }
            }
            _ => return Err(SchedError::OutOfRange),
        };

        Ok(Self {
            cpus: header.cpus,
            class,
        })
    }

    /// Convenience form of `decode` for parameters that arrive as message
    /// words.
    pub fn decode_words(words: &[usize]) -> Result<Self, SchedError> {
        Self::decode(words.as_bytes())
    }
}

/// Errors reported back to user code when scheduling parameters can't be
/// applied.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum SchedError {
    /// The parameter block is malformed, or a WFQ context asked for a zero
    /// weight or quantum.
    InvalidParameter,
    /// The scheduling class, or a CPU number, is outside the range the kernel
    /// knows about.
    OutOfRange,
}

impl SchedError {
    /// Response code returned to user code for this error.
    pub const fn code(self) -> u32 {
        match self {
            Self::InvalidParameter => 22,
            Self::OutOfRange => 34,
        }
    }
}
