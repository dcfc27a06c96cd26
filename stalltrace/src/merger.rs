//! Bounded aggregation of finished dispatch segments.
//!
//! The merger folds short, same-scene dispatches into compact [`Range`]s so
//! a long window of history fits in a small, fixed-size deque. Eviction is
//! FIFO and reuses the evicted element's allocations, keeping the steady
//! state allocation-free.

use std::collections::VecDeque;

use crate::{record::Mark, segment::Segment};

/// One merged run of consecutive dispatches.
///
/// Keeps the start coordinates of the first folded segment, running totals,
/// and a full copy of the last folded segment so the end coordinates and
/// metadata of the run are always those of its newest member.
#[derive(Clone, Debug, Default)]
pub struct Range {
    count: usize,
    start_mark: Mark,
    start_uptime_millis: i64,
    start_thread_time_millis: i64,
    idle_duration_millis: i64,
    last: Segment,
}

impl Range {
    fn init(&mut self, segment: &Segment) {
        self.count = 1;
        self.start_mark = segment.start_mark;
        self.start_uptime_millis = segment.start_uptime_millis;
        self.start_thread_time_millis = segment.start_thread_time_millis;
        self.idle_duration_millis = 0;
        self.last.copy_from(segment);
    }

    fn merge(&mut self, segment: &Segment) {
        self.count += 1;
        self.idle_duration_millis += segment.start_uptime_millis - self.last.end_uptime_millis;
        self.last.copy_from(segment);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_single(&self) -> bool {
        self.last.is_single
    }

    pub fn scene(&self) -> crate::looper::Scene {
        self.last.scene
    }

    pub fn start_mark(&self) -> Mark {
        self.start_mark
    }

    pub fn end_mark(&self) -> Mark {
        self.last.end_mark
    }

    pub fn start_uptime_millis(&self) -> i64 {
        self.start_uptime_millis
    }

    pub fn end_uptime_millis(&self) -> i64 {
        self.last.end_uptime_millis
    }

    pub fn start_thread_time_millis(&self) -> i64 {
        self.start_thread_time_millis
    }

    pub fn end_thread_time_millis(&self) -> i64 {
        self.last.end_thread_time_millis
    }

    /// Time spent idle between the folded dispatches.
    pub fn idle_duration_millis(&self) -> i64 {
        self.idle_duration_millis
    }

    /// Wall time covered by this range end to end.
    pub fn wall_duration_millis(&self) -> i64 {
        self.last.end_uptime_millis - self.start_uptime_millis
    }

    /// Metadata of the newest folded segment, rendered for a report.
    pub fn last_metadata(&self) -> String {
        self.last.metadata_string()
    }
}

pub struct Merger {
    capacity: usize,
    idle_threshold_millis: i64,
    merge_threshold_millis: i64,
    deque: VecDeque<Range>,
}

impl Merger {
    /// Built through [`History::merger`](crate::history::History::merger),
    /// which validates the configuration first.
    pub(crate) fn new(
        capacity: usize,
        idle_threshold_millis: i64,
        merge_threshold_millis: i64,
    ) -> Self {
        Self {
            capacity,
            idle_threshold_millis,
            merge_threshold_millis,
            deque: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.deque.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    /// Fold a finished segment into the newest range or open a new one,
    /// then reset the segment for its next dispatch.
    pub fn consume(&mut self, segment: &mut Segment) {
        if !self.merge(segment) {
            self.append(segment);
        }
        segment.reset();
    }

    fn merge(&mut self, segment: &Segment) -> bool {
        if segment.is_single {
            return false;
        }
        let Some(last) = self.deque.back_mut() else {
            return false;
        };
        if last.is_single() || last.scene() != segment.scene {
            return false;
        }
        let idle = segment.start_uptime_millis - last.end_uptime_millis();
        if idle > self.idle_threshold_millis {
            return false;
        }
        // Busy time only; the idle gaps between folded dispatches do not
        // count against the merge budget.
        let merged = last.last.wall_duration_millis() + segment.wall_duration_millis();
        if merged > self.merge_threshold_millis {
            return false;
        }
        last.merge(segment);
        true
    }

    fn append(&mut self, segment: &Segment) {
        let mut range = if self.deque.len() == self.capacity {
            // Evict the oldest range, reusing its allocations.
            match self.deque.pop_front() {
                Some(range) => range,
                None => Range::default(),
            }
        } else {
            Range::default()
        };
        range.init(segment);
        self.deque.push_back(range);
    }

    /// Copy out every retained range, oldest first.
    pub fn copy(&self) -> Vec<Range> {
        self.deque.iter().cloned().collect()
    }

    /// Copy out the ranges overlapping `start..=end` uptime, oldest first.
    ///
    /// A reversed or negative window yields nothing. Scans back to front
    /// and stops at the first range entirely before the window, so the
    /// cost is proportional to the window, not the deque.
    pub fn copy_window(&self, start_uptime_millis: i64, end_uptime_millis: i64) -> Vec<Range> {
        if start_uptime_millis < 0
            || end_uptime_millis < 0
            || end_uptime_millis < start_uptime_millis
        {
            return Vec::new();
        }
        let mut out = Vec::new();
        for range in self.deque.iter().rev() {
            if range.end_uptime_millis() < start_uptime_millis {
                break;
            }
            if range.start_uptime_millis() <= end_uptime_millis {
                out.push(range.clone());
            }
        }
        out.reverse();
        out
    }
}
