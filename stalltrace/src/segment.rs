//! Reusable per-dispatch accumulator.
//!
//! One [`Segment`] instance lives for the whole monitoring session and is
//! filled in from the Start and End halves of each dispatch, handed to the
//! [`Merger`](crate::merger::Merger), then reset for the next dispatch. The
//! plain fields make that reuse allocation-free; names are `Arc<str>` so
//! copying a populated segment is refcount traffic, not heap traffic.

use std::{cell::RefCell, sync::Arc};

use crate::{
    looper::{DispatchContext, End, LooperCallback, Metadata, Scene, Start},
    merger::{Merger, Range},
    record::Mark,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// A single segment must never be folded into a neighboring range.
    pub is_single: bool,
    /// Marks this dispatch worth a record snapshot in reports.
    pub need_record: bool,
    /// Marks this dispatch worth stack samples in reports.
    pub need_sample: bool,

    pub scene: Scene,
    pub start_mark: Mark,
    pub start_uptime_millis: i64,
    pub start_thread_time_millis: i64,
    pub end_mark: Mark,
    pub end_uptime_millis: i64,
    pub end_thread_time_millis: i64,

    // Scene = Message
    pub log: Option<Arc<str>>,
    pub when_ms: i64,
    pub what: i32,
    pub target_name: Option<Arc<str>>,
    pub callback_name: Option<Arc<str>>,
    pub arg1: i32,
    pub arg2: i32,

    // Scene = IdleHandler
    pub idle_handler_name: Option<Arc<str>>,

    // Scene = NativeInput
    pub is_touch: bool,
    pub action: i32,
    pub key_code: i32,
    pub raw_x: f32,
    pub raw_y: f32,
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            is_single: false,
            need_record: false,
            need_sample: false,
            scene: Scene::Message,
            start_mark: Mark::NONE,
            start_uptime_millis: 0,
            start_thread_time_millis: 0,
            end_mark: Mark::NONE,
            end_uptime_millis: 0,
            end_thread_time_millis: 0,
            log: None,
            when_ms: 0,
            what: 0,
            target_name: None,
            callback_name: None,
            arg1: 0,
            arg2: 0,
            idle_handler_name: None,
            is_touch: false,
            action: 0,
            key_code: 0,
            raw_x: 0.0,
            raw_y: 0.0,
        }
    }
}

impl Segment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wall_duration_millis(&self) -> i64 {
        self.end_uptime_millis - self.start_uptime_millis
    }

    pub fn cpu_duration_millis(&self) -> i64 {
        self.end_thread_time_millis - self.start_thread_time_millis
    }

    /// Back to the canonical empty state, ready for the next dispatch.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn copy_from(&mut self, other: &Segment) {
        self.clone_from(other);
    }

    /// Capture the Start half of a dispatch.
    pub fn collect_start(&mut self, start: &Start) {
        self.scene = start.scene;
        self.start_mark = start.mark;
        self.start_uptime_millis = start.uptime_millis;
        self.start_thread_time_millis = start.thread_time_millis;
    }

    /// Capture the End half of a dispatch, including its metadata.
    pub fn collect_end(&mut self, end: &End) {
        self.end_mark = end.mark;
        self.end_uptime_millis = end.uptime_millis;
        self.end_thread_time_millis = end.thread_time_millis;
        match &end.metadata {
            Metadata::None => {}
            Metadata::MessageLog(log) => self.log = Some(log.clone()),
            Metadata::Message {
                when_ms,
                what,
                target_name,
                callback_name,
                arg1,
                arg2,
            } => {
                self.when_ms = *when_ms;
                self.what = *what;
                self.target_name = target_name.clone();
                self.callback_name = callback_name.clone();
                self.arg1 = *arg1;
                self.arg2 = *arg2;
            }
            Metadata::IdleHandler { name } => self.idle_handler_name = Some(name.clone()),
            Metadata::Touch { action, raw_x, raw_y } => {
                self.is_touch = true;
                self.action = *action;
                self.raw_x = *raw_x;
                self.raw_y = *raw_y;
            }
            Metadata::Key { action, key_code } => {
                self.is_touch = false;
                self.action = *action;
                self.key_code = *key_code;
            }
        }
    }

    /// Render the captured metadata for a report. Allocates; report-time
    /// only, never on the dispatch path.
    pub fn metadata_string(&self) -> String {
        match self.scene {
            Scene::Message => match &self.log {
                Some(log) => log.to_string(),
                // The dispatch uptime only exists segment-side, so the
                // structured form is rendered here rather than through
                // the metadata's own Display.
                None => format!(
                    "Message {{ uptime={}, when={}, what={}, target={}, callback={}, arg1={}, arg2={} }}",
                    self.start_uptime_millis,
                    self.when_ms,
                    self.what,
                    self.target_name.as_deref().unwrap_or(""),
                    self.callback_name.as_deref().unwrap_or(""),
                    self.arg1,
                    self.arg2,
                ),
            },
            Scene::IdleHandler => Metadata::IdleHandler {
                name: self.idle_handler_name.clone().unwrap_or_else(|| "".into()),
            }
            .to_string(),
            Scene::NativeInput => if self.is_touch {
                Metadata::Touch {
                    action: self.action,
                    raw_x: self.raw_x,
                    raw_y: self.raw_y,
                }
            } else {
                Metadata::Key {
                    action: self.action,
                    key_code: self.key_code,
                }
            }
            .to_string(),
        }
    }
}

/// Feeds one reused [`Segment`] per dispatch into a [`Merger`].
///
/// Installed as the composite's privileged first callback so the merged
/// timeline is current before any analyzer runs. Owning-thread-only.
pub struct SegmentCollector {
    segment: RefCell<Segment>,
    merger: RefCell<Merger>,
}

impl SegmentCollector {
    pub fn new(merger: Merger) -> Self {
        Self {
            segment: RefCell::new(Segment::new()),
            merger: RefCell::new(merger),
        }
    }

    pub fn copy(&self) -> Vec<Range> {
        self.merger.borrow().copy()
    }

    pub fn copy_window(&self, start_uptime_millis: i64, end_uptime_millis: i64) -> Vec<Range> {
        self.merger
            .borrow()
            .copy_window(start_uptime_millis, end_uptime_millis)
    }
}

impl LooperCallback for SegmentCollector {
    fn dispatch(&self, current: &DispatchContext) {
        match current {
            DispatchContext::Start(start) => {
                self.segment.borrow_mut().collect_start(start);
            }
            DispatchContext::End(end) => {
                let mut segment = self.segment.borrow_mut();
                segment.collect_end(end);
                self.merger.borrow_mut().consume(&mut segment);
            }
        }
    }
}
