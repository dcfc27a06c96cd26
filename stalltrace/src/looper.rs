//! Event-loop dispatch model.
//!
//! Platform hook shims (external to this crate) translate the host event
//! loop's internals into per-dispatch [`LooperDispatcher::start`] /
//! [`LooperDispatcher::end`] calls tagged with a [`Scene`]. The dispatcher
//! brackets each dispatch with history marks and fans a [`DispatchContext`]
//! out to registered [`LooperCallback`]s, guarding against the reentrant or
//! mismatched start/end pairs some platforms are known to report.
//!
//! Everything in this module is owning-thread-only; none of the types are
//! meant to cross threads except through the analyzer-side copies they make.

use std::{
    cell::{Cell, RefCell},
    fmt,
    sync::Arc,
};

use crate::{history::History, record::Mark, time};

/// Category of an event-loop dispatch.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Scene {
    /// A queued or timed message being dispatched.
    Message,
    /// An idle callback running while the queue is empty.
    IdleHandler,
    /// Native input delivery (touch or key).
    NativeInput,
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scene::Message => "Message",
            Scene::IdleHandler => "IdleHandler",
            Scene::NativeInput => "NativeInput",
        };
        f.write_str(name)
    }
}

/// Scene-specific payload supplied by the platform hooks.
///
/// Opaque to the recording core; segments copy what they need and reports
/// render it through `Display`. Names are shared (`Arc<str>`) so copying a
/// metadata value never allocates.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Metadata {
    #[default]
    None,
    /// Pre-rendered message log line (older platforms expose only this).
    MessageLog(Arc<str>),
    /// Structured message description.
    Message {
        when_ms: i64,
        what: i32,
        target_name: Option<Arc<str>>,
        callback_name: Option<Arc<str>>,
        arg1: i32,
        arg2: i32,
    },
    IdleHandler {
        name: Arc<str>,
    },
    Touch {
        action: i32,
        raw_x: f32,
        raw_y: f32,
    },
    Key {
        action: i32,
        key_code: i32,
    },
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metadata::None => f.write_str("Metadata { none }"),
            Metadata::MessageLog(log) => f.write_str(log),
            Metadata::Message {
                when_ms,
                what,
                target_name,
                callback_name,
                arg1,
                arg2,
            } => write!(
                f,
                "Message {{ when={when_ms}, what={what}, target={}, callback={}, arg1={arg1}, arg2={arg2} }}",
                target_name.as_deref().unwrap_or(""),
                callback_name.as_deref().unwrap_or(""),
            ),
            Metadata::IdleHandler { name } => write!(f, "IdleHandler {{ name={name} }}"),
            Metadata::Touch { action, raw_x, raw_y } => {
                write!(f, "MotionEvent {{ action={action}, rawX={raw_x}, rawY={raw_y} }}")
            }
            Metadata::Key { action, key_code } => {
                write!(f, "KeyEvent {{ action={action}, keyCode={key_code} }}")
            }
        }
    }
}

/// Start half of a dispatch.
#[derive(Clone, Debug)]
pub struct Start {
    pub scene: Scene,
    /// History mark bracketing the start, [`Mark::NONE`] when recording is
    /// not active yet.
    pub mark: Mark,
    pub uptime_millis: i64,
    pub thread_time_millis: i64,
    pub metadata: Metadata,
}

/// End half of a dispatch.
#[derive(Clone, Debug)]
pub struct End {
    pub scene: Scene,
    pub mark: Mark,
    pub uptime_millis: i64,
    pub thread_time_millis: i64,
    pub metadata: Metadata,
}

/// One dispatch event as seen by callbacks.
#[derive(Clone, Debug)]
pub enum DispatchContext {
    Start(Start),
    End(End),
}

impl DispatchContext {
    pub fn scene(&self) -> Scene {
        match self {
            DispatchContext::Start(start) => start.scene,
            DispatchContext::End(end) => end.scene,
        }
    }

    pub fn uptime_millis(&self) -> i64 {
        match self {
            DispatchContext::Start(start) => start.uptime_millis,
            DispatchContext::End(end) => end.uptime_millis,
        }
    }
}

/// Receives every dispatch Start/End on the owning thread.
pub trait LooperCallback {
    fn dispatch(&self, current: &DispatchContext);
}

/// Fans one Start/End pair out to an ordered set of callbacks.
///
/// The privileged `first` callback always runs before the registered list;
/// the segment collector sits there so analyzers observe a segment that is
/// already populated. Once [`immutable`](Self::immutable) is called, add and
/// remove copy the list instead of mutating it, so an in-flight dispatch
/// iterating the snapshot taken at Start never observes a mutation made by
/// one of its own callbacks.
#[derive(Default)]
pub struct CompositeLooperCallback {
    first: RefCell<Option<Arc<dyn LooperCallback>>>,
    callbacks: RefCell<Arc<Vec<Arc<dyn LooperCallback>>>>,
    dispatching: RefCell<Option<Arc<Vec<Arc<dyn LooperCallback>>>>>,
    is_immutable: Cell<bool>,
}

impl CompositeLooperCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the privileged callback that runs before all others.
    pub fn set_first(&self, callback: Arc<dyn LooperCallback>) {
        *self.first.borrow_mut() = Some(callback);
    }

    /// Freeze the registration list; further add/remove copy-on-write.
    pub fn immutable(&self) {
        self.is_immutable.set(true);
    }

    pub fn add(&self, callback: Arc<dyn LooperCallback>) {
        let mut callbacks = self.callbacks.borrow_mut();
        if self.is_immutable.get() {
            let mut copied = Vec::clone(&callbacks);
            copied.push(callback);
            *callbacks = Arc::new(copied);
        } else {
            // Arc::make_mut copies anyway if a dispatch snapshot still
            // holds the list, which keeps the pre-freeze path safe too.
            Arc::make_mut(&mut callbacks).push(callback);
        }
    }

    pub fn remove(&self, callback: &Arc<dyn LooperCallback>) {
        let mut callbacks = self.callbacks.borrow_mut();
        if self.is_immutable.get() {
            let copied = callbacks
                .iter()
                .filter(|existing| !Arc::ptr_eq(existing, callback))
                .cloned()
                .collect();
            *callbacks = Arc::new(copied);
        } else {
            Arc::make_mut(&mut callbacks).retain(|existing| !Arc::ptr_eq(existing, callback));
        }
    }

    fn dispatch_to_all(&self, snapshot: &Arc<Vec<Arc<dyn LooperCallback>>>, current: &DispatchContext) {
        let first = self.first.borrow().clone();
        if let Some(first) = first {
            first.dispatch(current);
        }
        for callback in snapshot.iter() {
            callback.dispatch(current);
        }
    }
}

impl LooperCallback for CompositeLooperCallback {
    fn dispatch(&self, current: &DispatchContext) {
        match current {
            DispatchContext::Start(_) => {
                let snapshot = self.callbacks.borrow().clone();
                *self.dispatching.borrow_mut() = Some(snapshot.clone());
                self.dispatch_to_all(&snapshot, current);
            }
            DispatchContext::End(_) => {
                let snapshot = self.dispatching.borrow_mut().take();
                // An End without its Start snapshot falls back to the live
                // list; the dispatcher's scene guard makes this rare.
                let snapshot = snapshot.unwrap_or_else(|| self.callbacks.borrow().clone());
                self.dispatch_to_all(&snapshot, current);
            }
        }
    }
}

/// Per-scene Idle -> Dispatching -> Idle state machine.
///
/// A second `start` while any dispatch is in flight is ignored, as is an
/// `end` whose scene does not match the in-flight one; some platform
/// versions report overlapping pairs and the guard keeps downstream
/// consumers single-entrant.
pub struct LooperDispatcher {
    history: Arc<History>,
    callback: Arc<dyn LooperCallback>,
    dispatching_scene: Cell<Option<Scene>>,
    dispatching_mark: Cell<Mark>,
}

impl LooperDispatcher {
    pub fn new(history: Arc<History>, callback: Arc<dyn LooperCallback>) -> Self {
        Self {
            history,
            callback,
            dispatching_scene: Cell::new(None),
            dispatching_mark: Cell::new(Mark::NONE),
        }
    }

    pub fn start(&self, scene: Scene, metadata: Metadata) {
        if self.dispatching_scene.get().is_some() {
            return;
        }
        self.dispatching_scene.set(Some(scene));
        let mark = self.history.start_mark();
        self.dispatching_mark.set(mark);
        let context = DispatchContext::Start(Start {
            scene,
            mark,
            uptime_millis: time::uptime_millis(),
            thread_time_millis: time::thread_time_millis(),
            metadata,
        });
        self.callback.dispatch(&context);
    }

    pub fn end(&self, scene: Scene, metadata: Metadata) {
        if self.dispatching_scene.get() != Some(scene) {
            return;
        }
        self.dispatching_scene.set(None);
        // Only close the slice that was actually opened at start.
        let mark = if self.dispatching_mark.get().is_none() {
            Mark::NONE
        } else {
            self.history.end_mark()
        };
        let context = DispatchContext::End(End {
            scene,
            mark,
            uptime_millis: time::uptime_millis(),
            thread_time_millis: time::thread_time_millis(),
            metadata,
        });
        self.callback.dispatch(&context);
    }
}
