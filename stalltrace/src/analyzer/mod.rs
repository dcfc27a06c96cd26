//! Consumers of recorded history.
//!
//! Analyzers sit behind [`LooperCallback`](crate::looper::LooperCallback)
//! registrations: they observe dispatch Start/End pairs on the owning thread,
//! keep their per-dispatch state in plain cells, and hand anything expensive
//! to their own worker threads.

mod anr;
mod block;
mod report;

pub use anr::{AnrWatchdog, MainTaskPoster, ProcessErrorLookup, ProcessErrorState};
pub use block::BlockAnalyzer;
pub use report::{BlockReceiver, BlockReport, Sample, SampleProvider};
