//! Recording facade tying the instrumentation entry points to the ring
//! buffer.
//!
//! A [`History`] is constructed once, on the thread it is meant to trace,
//! and then shared (`Arc`) with analyzers on other threads. Write paths are
//! gated on the owning thread's id so stray calls from worker threads are
//! cheap no-ops instead of data races; read paths (`latest_mark`,
//! `snapshot`) are safe from anywhere.

use std::{
    sync::OnceLock,
    thread::{self, ThreadId},
};

use crate::{
    config::{ConfigError, HistoryConfig},
    merger::Merger,
    record::{ID_MAX, ID_SLICE, Mark},
    recorder::Recorder,
    snapshot::Snapshot,
    time,
};

pub struct History {
    owner: ThreadId,
    config: HistoryConfig,
    /// Created on first use so an idle facade costs nothing but the
    /// configuration it holds.
    recorder: OnceLock<Recorder>,
}

impl History {
    /// Validate `config` and bind the facade to the calling thread.
    pub fn new(config: HistoryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            owner: thread::current().id(),
            config,
            recorder: OnceLock::new(),
        })
    }

    #[inline]
    fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn recorder(&self) -> &Recorder {
        self.recorder.get_or_init(|| {
            tracing::debug!(
                capacity = self.config.recorder_capacity,
                "record buffer allocated"
            );
            Recorder::new(self.config.recorder_capacity)
        })
    }

    /// Record a method enter. Owning thread only; ids at or above
    /// [`ID_MAX`] are dropped.
    #[inline]
    pub fn enter(&self, id: u32) {
        if id >= ID_MAX || !self.is_owner() {
            return;
        }
        self.recorder().enter(id, time::uptime_millis());
    }

    /// Record a method exit. Owning thread only.
    #[inline]
    pub fn exit(&self, id: u32) {
        if id >= ID_MAX || !self.is_owner() {
            return;
        }
        // Exit without a recorder means enter never ran either; skip the
        // allocation rather than record an unmatched exit.
        if let Some(recorder) = self.recorder.get() {
            recorder.exit(id, time::uptime_millis());
        }
    }

    /// Open a bracketed slice and return the mark preceding it.
    ///
    /// Returns [`Mark::NONE`] off-thread, or while no real `enter` has
    /// created the recorder yet; taking a mark must never allocate the
    /// ring buffer on behalf of instrumentation that never ran.
    pub fn start_mark(&self) -> Mark {
        if !self.is_owner() {
            return Mark::NONE;
        }
        let Some(recorder) = self.recorder.get() else {
            return Mark::NONE;
        };
        recorder.enter(ID_SLICE, time::uptime_millis());
        recorder.mark()
    }

    /// Close a bracketed slice and return the mark covering it.
    pub fn end_mark(&self) -> Mark {
        if !self.is_owner() {
            return Mark::NONE;
        }
        let Some(recorder) = self.recorder.get() else {
            return Mark::NONE;
        };
        recorder.exit(ID_SLICE, time::uptime_millis());
        recorder.mark()
    }

    /// Mark of the most recently written record. Safe from any thread.
    pub fn latest_mark(&self) -> Mark {
        match self.recorder.get() {
            Some(recorder) => recorder.mark(),
            None => Mark::NONE,
        }
    }

    /// Extract the records between two marks. Safe from any thread; a
    /// missing recorder or sentinel mark yields the empty snapshot.
    pub fn snapshot(&self, start: Mark, end: Mark) -> Snapshot {
        if start.is_none() || end.is_none() {
            return Snapshot::empty();
        }
        match self.recorder.get() {
            Some(recorder) => recorder.snapshot(start, end),
            None => Snapshot::empty(),
        }
    }

    /// A merger sized by this facade's configuration.
    pub fn merger(&self) -> Merger {
        Merger::new(
            self.config.merger_capacity,
            self.config.idle_threshold_millis,
            self.config.merge_threshold_millis,
        )
    }
}
