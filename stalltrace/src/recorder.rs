//! Fixed-capacity ring buffer of packed [`Record`] words.
//!
//! The recorder is single-writer: every `enter`/`exit` comes from the owning
//! (UI) thread, sequenced by the [`History`](crate::history::History) facade.
//! Readers on other threads take [`Mark`]s and extract [`Snapshot`]s. There
//! is no lock on either side; wraparound races are resolved by the mark-range
//! validity check, which fails closed to the empty snapshot whenever the
//! writer has lapped the requested window.
//!
//! Ordering contract: the buffer slot is stored before `latest_mark`, and
//! `latest_mark` is stored with release ordering. A reader that observes a
//! given mark through an acquire load is therefore guaranteed to observe the
//! slot that mark names, and everything written before it.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::{
    record::{Mark, Record},
    snapshot::Snapshot,
};

pub struct Recorder {
    buffer: Box<[AtomicU64]>,
    capacity: usize,
    /// Next write position. Written only by the owning thread.
    next_index: AtomicUsize,
    /// Full wraps so far. Written only by the owning thread.
    epoch: AtomicU32,
    /// Mark of the most recently written record. The release write that
    /// publishes each append.
    latest_mark: AtomicI64,
}

impl Recorder {
    /// `capacity` must be positive; the facade validates configuration
    /// before constructing a recorder.
    pub fn new(capacity: usize) -> Self {
        let buffer = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        Self {
            buffer,
            capacity,
            next_index: AtomicUsize::new(0),
            epoch: AtomicU32::new(0),
            latest_mark: AtomicI64::new(0),
        }
    }

    /// Append an enter record. O(1), allocation-free, never fails.
    #[inline]
    pub fn enter(&self, id: u32, time_ms: i64) {
        self.record(id, time_ms, true);
    }

    /// Append an exit record. O(1), allocation-free, never fails.
    #[inline]
    pub fn exit(&self, id: u32, time_ms: i64) {
        self.record(id, time_ms, false);
    }

    /// Mark of the most recently written record. Safe from any thread.
    #[inline]
    pub fn mark(&self) -> Mark {
        Mark::from_raw(self.latest_mark.load(Ordering::Acquire))
    }

    #[inline]
    fn record(&self, id: u32, time_ms: i64, is_enter: bool) {
        let mut index = self.next_index.load(Ordering::Relaxed);
        if index == self.capacity {
            let epoch = self.epoch.load(Ordering::Relaxed).wrapping_add(1);
            self.epoch.store(epoch, Ordering::Relaxed);
            index = 0;
        }
        self.buffer[index].store(Record::pack(id, time_ms, is_enter).raw(), Ordering::Relaxed);
        self.next_index.store(index + 1, Ordering::Relaxed);
        let epoch = self.epoch.load(Ordering::Relaxed) as i32;
        self.latest_mark
            .store(Mark::pack(epoch, index as i32).raw(), Ordering::Release);
    }

    /// Copy the records between two marks, inclusive.
    ///
    /// Returns the empty snapshot when the range is no longer contiguous
    /// write history (either mark lapped by the writer, or end before
    /// start), or when the first copied word is zero — a slot the writer
    /// had not yet filled when the start mark leaked ahead of it.
    pub fn snapshot(&self, start: Mark, end: Mark) -> Snapshot {
        let latest = self.mark();
        if !Mark::check_range(start, latest)
            || !Mark::check_range(end, latest)
            || !Mark::check_range(start, end)
        {
            return Snapshot::empty();
        }

        let start_index = start.index() as usize;
        let end_index = end.index() as usize;
        let mut words;
        if start_index <= end_index {
            words = Vec::with_capacity(end_index - start_index + 1);
            self.copy_slots(start_index..=end_index, &mut words);
        } else {
            // The slice wraps: tail of the buffer, then its head.
            words = Vec::with_capacity(self.capacity - start_index + end_index + 1);
            self.copy_slots(start_index..=self.capacity - 1, &mut words);
            self.copy_slots(0..=end_index, &mut words);
        }

        if words.first() == Some(&0) {
            return Snapshot::empty();
        }
        Snapshot::from_words(words)
    }

    fn copy_slots(&self, range: std::ops::RangeInclusive<usize>, out: &mut Vec<u64>) {
        for slot in &self.buffer[*range.start()..=*range.end()] {
            out.push(slot.load(Ordering::Relaxed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::uptime_millis;

    const ID_A: u32 = 1;
    const ID_B: u32 = 2;
    const ID_C: u32 = 3;
    const CAPACITY: usize = 6;

    // A(en) B(en) B(ex) C(en) C(ex) A(ex)
    fn call_a(recorder: &Recorder) {
        recorder.enter(ID_A, uptime_millis());
        call_b(recorder);
        call_c(recorder);
        recorder.exit(ID_A, uptime_millis());
    }

    fn call_b(recorder: &Recorder) {
        recorder.enter(ID_B, uptime_millis());
        recorder.exit(ID_B, uptime_millis());
    }

    fn call_c(recorder: &Recorder) {
        recorder.enter(ID_C, uptime_millis());
        recorder.exit(ID_C, uptime_millis());
    }

    fn assert_record(snapshot: &Snapshot, index: usize, id: u32, is_enter: bool) {
        let record = snapshot.get(index).unwrap();
        assert_eq!(record.id(), id);
        assert_eq!(record.is_enter(), is_enter);
    }

    #[test]
    fn empty_recorder_mark() {
        let recorder = Recorder::new(CAPACITY);
        let mark = recorder.mark();
        assert_eq!(mark.epoch(), 0);
        assert_eq!(mark.index(), 0);
    }

    #[test]
    fn mark_without_wrap() {
        let recorder = Recorder::new(CAPACITY);
        let start = recorder.mark();
        call_a(&recorder);
        let end = recorder.mark();

        assert_eq!(start.epoch(), 0);
        assert_eq!(start.index(), 0);
        assert_eq!(end.epoch(), 0);
        assert_eq!(end.index(), CAPACITY as i32 - 1);
    }

    #[test]
    fn mark_after_wrap() {
        let recorder = Recorder::new(CAPACITY);
        call_b(&recorder);
        call_c(&recorder);
        call_b(&recorder);

        let start = recorder.mark();
        call_c(&recorder);
        let end = recorder.mark();

        assert_eq!(start.epoch(), 0);
        assert_eq!(start.index(), CAPACITY as i32 - 1);
        assert_eq!(end.epoch(), 1);
        assert_eq!(end.index(), 1);
    }

    #[test]
    fn empty_snapshot_from_fresh_recorder() {
        let recorder = Recorder::new(CAPACITY);
        let start = recorder.mark();
        let end = recorder.mark();
        assert!(recorder.snapshot(start, end).is_empty());
    }

    #[test]
    fn snapshot_in_call_order() {
        let recorder = Recorder::new(CAPACITY);
        let start = recorder.mark();
        call_a(&recorder);
        let end = recorder.mark();

        let snapshot = recorder.snapshot(start, end);
        assert_eq!(snapshot.len(), 6);
        assert_record(&snapshot, 0, ID_A, true);
        assert_record(&snapshot, 1, ID_B, true);
        assert_record(&snapshot, 2, ID_B, false);
        assert_record(&snapshot, 3, ID_C, true);
        assert_record(&snapshot, 4, ID_C, false);
        assert_record(&snapshot, 5, ID_A, false);
    }

    #[test]
    fn snapshot_concatenates_across_wrap() {
        let recorder = Recorder::new(CAPACITY);
        call_b(&recorder);
        call_c(&recorder);
        call_b(&recorder);

        let start = recorder.mark();
        call_c(&recorder);
        let end = recorder.mark();

        // B(ex) C(en) C(ex): tail slot, then the wrapped head slots.
        let snapshot = recorder.snapshot(start, end);
        assert_eq!(snapshot.len(), 3);
        assert_record(&snapshot, 0, ID_B, false);
        assert_record(&snapshot, 1, ID_C, true);
        assert_record(&snapshot, 2, ID_C, false);
        let first = snapshot.get(0).unwrap();
        let last = snapshot.get(2).unwrap();
        assert!(first.time_ms() <= last.time_ms());
    }

    #[test]
    fn snapshot_rejects_overwritten_range() {
        let recorder = Recorder::new(CAPACITY);
        call_a(&recorder);

        let start = recorder.mark();
        // A full lap overwrites everything the start mark points at.
        call_a(&recorder);
        let end = recorder.mark();
        assert!(recorder.snapshot(start, end).is_empty());
    }

    #[test]
    fn snapshot_rejects_reversed_range() {
        let recorder = Recorder::new(CAPACITY);
        call_b(&recorder);
        let end = recorder.mark();
        call_c(&recorder);
        let start = recorder.mark();
        assert!(recorder.snapshot(start, end).is_empty());
    }
}
