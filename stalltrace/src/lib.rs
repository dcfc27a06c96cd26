//! # stalltrace
//!
//! Always-on, low-overhead execution tracing for diagnosing main-thread
//! stalls.
//!
//! Instrumented enter/exit events stream into a fixed ring buffer as packed
//! 64-bit words; the hot path is lock-free, allocation-free, and cheap
//! enough to leave enabled in production. When a stall is detected, the
//! relevant span of history is addressed by [`Mark`]s, extracted as an
//! immutable [`Snapshot`], and reconstructed into the call tree that was on
//! the thread at the time.
//!
//! ## Architecture
//!
//! - [`History`] — the recording facade: owning-thread writes, any-thread
//!   reads, bracketed slice marks for event-loop dispatches.
//! - [`looper`] — the dispatch model: scene-tagged Start/End pairs fanned
//!   out to registered callbacks.
//! - [`Segment`] / [`Merger`] — per-dispatch accumulation folded into a
//!   bounded timeline of merged ranges.
//! - [`analyzer`] — block detection with stack sampling, and a hung-thread
//!   watchdog.

pub mod analyzer;
pub mod config;
pub mod history;
pub mod looper;
pub mod merger;
pub mod record;
pub mod recorder;
pub mod segment;
pub mod snapshot;
pub mod time;

pub use config::{AnrConfig, BlockConfig, ConfigError, HistoryConfig};
pub use history::History;
pub use looper::{
    CompositeLooperCallback, DispatchContext, LooperCallback, LooperDispatcher, Metadata, Scene,
};
pub use merger::{Merger, Range};
pub use record::{ID_MAX, ID_SLICE, Mark, Record};
pub use recorder::Recorder;
pub use segment::{Segment, SegmentCollector};
pub use snapshot::{Node, ROOT_ID, Snapshot};
