//! Report types shared by the analyzers.

use std::sync::Arc;

use crate::{looper::Scene, snapshot::Snapshot};

/// One captured main-thread stack.
#[derive(Clone, Debug)]
pub struct Sample {
    pub uptime_millis: i64,
    /// Rendered stack trace. Shared so fan-out to receivers never copies
    /// the text.
    pub stack: Arc<str>,
}

/// Captures the monitored thread's current stack.
///
/// Implemented by the platform layer; capture runs on the analyzer's
/// sampling thread, so implementations must be safe to call off-thread.
pub trait SampleProvider: Send + Sync {
    /// `None` when the stack cannot be captured right now; the analyzer
    /// records nothing for that tick.
    fn sample(&self) -> Option<Sample>;
}

/// Everything known about one over-threshold dispatch.
#[derive(Clone, Debug)]
pub struct BlockReport {
    pub scene: Scene,
    /// Rendered dispatch metadata, scene-specific.
    pub metadata: String,
    pub threshold_millis: i64,
    pub start_uptime_millis: i64,
    pub end_uptime_millis: i64,
    pub start_thread_time_millis: i64,
    pub end_thread_time_millis: i64,
    /// Wall-clock epoch ms at which the report was assembled.
    pub create_time_millis: i64,
    /// False when the records between the marks were already overwritten;
    /// `snapshot` is empty in that case but the report still carries the
    /// timing data.
    pub is_record_available: bool,
    pub snapshot: Snapshot,
    pub samples: Vec<Sample>,
}

impl BlockReport {
    pub fn wall_duration_millis(&self) -> i64 {
        self.end_uptime_millis - self.start_uptime_millis
    }

    pub fn cpu_duration_millis(&self) -> i64 {
        self.end_thread_time_millis - self.start_thread_time_millis
    }
}

/// Receives completed block reports on the analyzer's worker thread.
pub trait BlockReceiver: Send {
    fn on_block(&self, report: &BlockReport);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_durations() {
        let report = BlockReport {
            scene: Scene::Message,
            metadata: String::new(),
            threshold_millis: 700,
            start_uptime_millis: 1_000,
            end_uptime_millis: 1_900,
            start_thread_time_millis: 100,
            end_thread_time_millis: 350,
            create_time_millis: 0,
            is_record_available: false,
            snapshot: Snapshot::empty(),
            samples: Vec::new(),
        };
        assert_eq!(report.wall_duration_millis(), 900);
        assert_eq!(report.cpu_duration_millis(), 250);
    }
}
