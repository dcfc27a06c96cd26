//! Bit-packed value types for the ring buffer.
//!
//! A [`Record`] is one instrumentation event packed into a single 64-bit
//! word; a [`Mark`] is an epoch-aware cursor into the ring buffer's total
//! write history, also one word. Both layouts live here and nowhere else so
//! a change to a field width is a single edit.
//!
//! # Record layout
//!
//! ```text
//! bit 63      bits 43..=62        bits 0..=42
//! [enter:1]   [method id:20]      [timestamp ms:43]
//! ```
//!
//! # Mark layout
//!
//! ```text
//! bits 32..=63   bits 0..=31
//! [epoch:32]     [buffer index:32]
//! ```

/// Largest representable method id, reserved as the "no such id" sentinel.
///
/// The facade rejects ids at or above this value before they reach the
/// recorder, so a stored record never carries it.
pub const ID_MAX: u32 = 0xF_FFFF;

/// Reserved id bracketing a manually-delimited span rather than a real
/// instrumented method.
pub const ID_SLICE: u32 = ID_MAX - 1;

const ENTER_SHIFT: u32 = 63;
const ID_SHIFT: u32 = 43;
const ID_MASK: u64 = 0xF_FFFF;
const TIME_MASK: u64 = 0x7FF_FFFF_FFFF;

/// One instrumentation event: `{method id, timestamp, enter flag}` packed
/// into a single word for cache density. Immutable once created.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Record(u64);

impl Record {
    /// Pack the three fields. `id` is truncated to 20 bits and `time_ms` to
    /// 43 bits; callers keep values in range (the facade rejects oversized
    /// ids, and a 43-bit millisecond counter outlives any process).
    #[inline]
    pub fn pack(id: u32, time_ms: i64, is_enter: bool) -> Self {
        let mut value = if is_enter { 1u64 << ENTER_SHIFT } else { 0 };
        value |= (u64::from(id) & ID_MASK) << ID_SHIFT;
        value |= time_ms as u64 & TIME_MASK;
        Self(value)
    }

    /// Reinterpret a raw buffer word as a record.
    #[inline]
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn id(self) -> u32 {
        ((self.0 >> ID_SHIFT) & ID_MASK) as u32
    }

    #[inline]
    pub fn time_ms(self) -> i64 {
        (self.0 & TIME_MASK) as i64
    }

    #[inline]
    pub fn is_enter(self) -> bool {
        (self.0 >> ENTER_SHIFT) == 1
    }
}

const INDEX_BITS: u32 = 32;
const INDEX_MASK: i64 = 0xFFFF_FFFF;

/// Opaque cursor identifying a position in the recorder's total write
/// history: `{epoch, index}` in one word.
///
/// A negative raw value is the "not available" sentinel ([`Mark::NONE`]),
/// returned when the recorder does not exist yet or a bracketing operation
/// could not take a mark.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Mark(i64);

impl Default for Mark {
    fn default() -> Self {
        Mark::NONE
    }
}

impl Mark {
    /// Sentinel for "no mark available".
    pub const NONE: Mark = Mark(-1);

    #[inline]
    pub fn pack(epoch: i32, index: i32) -> Self {
        Self((i64::from(epoch) << INDEX_BITS) | (i64::from(index) & INDEX_MASK))
    }

    #[inline]
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn raw(self) -> i64 {
        self.0
    }

    /// Number of full buffer wraps at the time this mark was taken.
    #[inline]
    pub fn epoch(self) -> i32 {
        (self.0 >> INDEX_BITS) as i32
    }

    /// Position within the buffer at the time this mark was taken.
    #[inline]
    pub fn index(self) -> i32 {
        (self.0 & INDEX_MASK) as i32
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 < 0
    }

    /// Whether `start..=end` still names a contiguous span of write history.
    ///
    /// Valid when both marks fall in the same epoch in order, or exactly one
    /// wrap separates them and the wrapped span stays within capacity. Any
    /// other relationship means the start has been overwritten and the range
    /// must be treated as invalid.
    #[inline]
    pub fn check_range(start: Mark, end: Mark) -> bool {
        if start.epoch() == end.epoch() {
            start.index() <= end.index()
        } else if end.epoch() == start.epoch().wrapping_add(1) {
            end.index() < start.index()
        } else {
            false
        }
    }
}
