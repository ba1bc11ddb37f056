// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace ring buffer for the scheduler.
//!
//! A [`Ringbuf`] keeps the last `N` events recorded by some piece of kernel
//! state, together with the source line that recorded each one. It is meant
//! to be embedded in the structure being traced (the scheduler keeps one per
//! CPU run queue) so that it is found next to that state in a memory dump,
//! and so that independent instances never contend with each other.
//!
//! ## Constraints
//!
//! The payload type must implement both `Copy` and `PartialEq`. Payloads are
//! compared to collapse repeats: recording the same payload from the same
//! line as the most recent entry bumps that entry's `count` instead of
//! using a new slot.
//!
//! ## Recording
//!
//! Create the buffer with an initializer for its empty slots, then record
//! into it with [`ringbuf_entry!`], which fills in the line number:
//!
//! ```ignore
//! struct Cpu {
//!     trace: Ringbuf<Event, 16>,
//! }
//!
//! let mut cpu = Cpu { trace: Ringbuf::new(Event::None) };
//! ringbuf_entry!(cpu.trace, Event::Switch(3));
//! ```
//!
//! ## Inspecting
//!
//! In a debugger the structure prints as-is; `last` names the newest entry
//! and each entry carries `line`, `generation`, `count` and `payload`. A
//! `generation` that differs from its neighbours' marks where the writer
//! wrapped around. From code, [`Ringbuf::iter`] walks the recorded entries
//! from oldest to newest.
//!
//! ## Disabling
//!
//! Enabling the `disabled` feature turns [`ringbuf_entry!`] into a no-op
//! that still evaluates (and type-checks) its arguments.

#![cfg_attr(not(test), no_std)]

/// Records `payload` into the ring buffer `buf`, tagged with the line the
/// macro was invoked from.
///
/// `buf` is a place expression naming a [`Ringbuf`], such as a struct field;
/// it is borrowed mutably for the duration of the call.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before borrowing the buffer, so that the
        // payload expression may read the structure the buffer lives in.
        let p = $payload;
        // Invoke this using slightly weird syntax to avoid accidentally
        // calling a _different_ routine called entry.
        $crate::Ringbuf::entry(&mut $buf, line!() as u16, p);
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.
///
#[derive(Debug, Clone)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    /// Creates an empty ring buffer whose slots all hold `init`.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // If this is the first time this ringbuf has been poked, last will be
        // None. In this specific case we want to make sure we don't add to the
        // count of an existing entry, and also that we deposit the first entry
        // in slot 0. Treat None as an out-of-range value:
        let last = self.last.unwrap_or(usize::MAX);

        // Check to see if we can reuse the most recent entry. get_mut also
        // covers a corrupted `last`; in that case we just start over at 0.
        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the
                // count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // Advance and wrap. usize::MAX has to wrap to zero here, so no
        // remainder.
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let Some(ent) = self.buffer.get_mut(ndx) else {
            // N == 0: nothing to record into.
            return;
        };
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Returns the most recently recorded entry, if any.
    pub fn last(&self) -> Option<&RingbufEntry<T>> {
        self.buffer.get(self.last?)
    }

    /// Iterates over the recorded entries, oldest first. Slots that have never
    /// been written are skipped.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(l) => l + 1,
            None => N,
        };
        (0..N)
            .map(move |i| &self.buffer[(start + i) % N])
            .filter(|ent| ent.count != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer() {
        let rb = Ringbuf::<u8, 4>::new(0);
        assert!(rb.last().is_none());
        assert_eq!(rb.iter().count(), 0);
    }

    #[test]
    fn repeats_are_counted() {
        let mut rb = Ringbuf::<u8, 4>::new(0);
        rb.entry(10, 1);
        rb.entry(10, 1);
        rb.entry(10, 1);
        // Same payload from a different line is a new entry.
        rb.entry(11, 1);

        let ents: Vec<_> = rb.iter().map(|e| (e.line, e.count)).collect();
        assert_eq!(ents, vec![(10, 3), (11, 1)]);
    }

    #[test]
    fn wraps_oldest_first() {
        let mut rb = Ringbuf::<u8, 3>::new(0);
        for p in 1..=5 {
            rb.entry(1, p);
        }
        let payloads: Vec<_> = rb.iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec![3, 4, 5]);
        assert_eq!(rb.last().map(|e| e.payload), Some(5));
        // Slot 0 has been written twice.
        assert_eq!(rb.buffer[0].generation, 2);
    }

    #[test]
    fn macro_records_line() {
        struct Holder {
            trace: Ringbuf<u32, 2>,
        }
        let mut h = Holder {
            trace: Ringbuf::new(0),
        };
        ringbuf_entry!(h.trace, 7);
        let line = line!() - 1;
        let last = h.trace.last().copied();
        assert_eq!(last.map(|e| e.payload), Some(7));
        assert_eq!(last.map(|e| u32::from(e.line)), Some(line));
    }

    #[test]
    fn zero_sized_buffer_ignores_entries() {
        let mut rb = Ringbuf::<u8, 0>::new(0);
        rb.entry(1, 1);
        assert!(rb.last().is_none());
    }
}
