//! Over-threshold dispatch detection.
//!
//! The analyzer watches Start/End pairs on the owning thread. While a
//! dispatch is in flight a sampling thread captures the monitored thread's
//! stack at a fixed interval; when an End lands past the block threshold the
//! timing data, the stack samples, and the history marks are shipped to a
//! worker thread, which extracts the record snapshot and fans the assembled
//! [`BlockReport`] out to its receivers. The owning thread never blocks and
//! never allocates on the non-blocked path.

use std::{
    cell::Cell,
    sync::{Arc, mpsc},
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::{
    analyzer::report::{BlockReceiver, BlockReport, Sample, SampleProvider},
    config::{BlockConfig, ConfigError},
    history::History,
    looper::{DispatchContext, LooperCallback, Scene},
    record::Mark,
};

struct ReportTask {
    scene: Scene,
    metadata: String,
    start_mark: Mark,
    end_mark: Mark,
    start_uptime_millis: i64,
    end_uptime_millis: i64,
    start_thread_time_millis: i64,
    end_thread_time_millis: i64,
    samples: Vec<Sample>,
}

#[derive(Default)]
struct SamplerState {
    active: bool,
    stopped: bool,
}

struct SamplerShared {
    state: Mutex<SamplerState>,
    signal: Condvar,
    samples: Mutex<Vec<Sample>>,
}

pub struct BlockAnalyzer {
    threshold_millis: i64,
    history: Arc<History>,
    in_flight: Cell<bool>,
    start_mark: Cell<Mark>,
    start_uptime_millis: Cell<i64>,
    start_thread_time_millis: Cell<i64>,
    sampler: Arc<SamplerShared>,
    sampler_handle: Option<thread::JoinHandle<()>>,
    sender: Option<mpsc::Sender<ReportTask>>,
    worker_handle: Option<thread::JoinHandle<()>>,
}

impl BlockAnalyzer {
    pub fn new(
        history: Arc<History>,
        config: BlockConfig,
        provider: Arc<dyn SampleProvider>,
        receivers: Vec<Box<dyn BlockReceiver>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let sampler = Arc::new(SamplerShared {
            state: Mutex::new(SamplerState::default()),
            signal: Condvar::new(),
            samples: Mutex::new(Vec::new()),
        });
        let sampler_handle = {
            let sampler = sampler.clone();
            let interval = Duration::from_millis(config.sample_interval_millis as u64);
            thread::Builder::new()
                .name("stalltrace-sample".to_string())
                .spawn(move || sampler_loop(sampler, provider, interval))
                .expect("failed to spawn sampling thread")
        };

        let (sender, receiver) = mpsc::channel::<ReportTask>();
        let worker_handle = {
            let history = history.clone();
            let threshold_millis = config.threshold_millis;
            thread::Builder::new()
                .name("stalltrace-block".to_string())
                .spawn(move || worker_loop(receiver, history, threshold_millis, receivers))
                .expect("failed to spawn block worker")
        };

        Ok(Self {
            threshold_millis: config.threshold_millis,
            history,
            in_flight: Cell::new(false),
            start_mark: Cell::new(Mark::NONE),
            start_uptime_millis: Cell::new(0),
            start_thread_time_millis: Cell::new(0),
            sampler,
            sampler_handle: Some(sampler_handle),
            sender: Some(sender),
            worker_handle: Some(worker_handle),
        })
    }

    fn set_sampling(&self, active: bool) {
        let mut state = self.sampler.state.lock();
        state.active = active;
        self.sampler.signal.notify_all();
    }

    fn take_samples(&self) -> Vec<Sample> {
        std::mem::take(&mut *self.sampler.samples.lock())
    }
}

impl LooperCallback for BlockAnalyzer {
    fn dispatch(&self, current: &DispatchContext) {
        match current {
            DispatchContext::Start(start) => {
                self.in_flight.set(true);
                self.start_mark.set(start.mark);
                self.start_uptime_millis.set(start.uptime_millis);
                self.start_thread_time_millis.set(start.thread_time_millis);
                self.sampler.samples.lock().clear();
                self.set_sampling(true);
            }
            DispatchContext::End(end) => {
                self.set_sampling(false);
                if !self.in_flight.replace(false) {
                    return;
                }
                let samples = self.take_samples();
                // A block must strictly exceed the threshold; landing
                // exactly on it does not count.
                let wall = end.uptime_millis - self.start_uptime_millis.get();
                if wall <= self.threshold_millis {
                    return;
                }
                let task = ReportTask {
                    scene: end.scene,
                    metadata: end.metadata.to_string(),
                    start_mark: self.start_mark.get(),
                    end_mark: end.mark,
                    start_uptime_millis: self.start_uptime_millis.get(),
                    end_uptime_millis: end.uptime_millis,
                    start_thread_time_millis: self.start_thread_time_millis.get(),
                    end_thread_time_millis: end.thread_time_millis,
                    samples,
                };
                if let Some(sender) = &self.sender
                    && let Err(err) = sender.send(task)
                {
                    error!("block report send failed: {err}");
                }
            }
        }
    }
}

impl Drop for BlockAnalyzer {
    fn drop(&mut self) {
        {
            let mut state = self.sampler.state.lock();
            state.stopped = true;
            self.sampler.signal.notify_all();
        }
        // Closing the channel ends the worker loop.
        self.sender.take();
        if let Some(handle) = self.sampler_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

fn sampler_loop(shared: Arc<SamplerShared>, provider: Arc<dyn SampleProvider>, interval: Duration) {
    loop {
        let mut state = shared.state.lock();
        while !state.active && !state.stopped {
            shared.signal.wait(&mut state);
        }
        if state.stopped {
            return;
        }
        // A notify during the wait means the dispatch ended (or the
        // analyzer is shutting down); only a full quiet interval with the
        // dispatch still in flight earns a sample.
        let timed_out = shared
            .signal
            .wait_for(&mut state, interval)
            .timed_out();
        if state.stopped {
            return;
        }
        let capture = state.active && timed_out;
        drop(state);
        if capture && let Some(sample) = provider.sample() {
            shared.samples.lock().push(sample);
        }
    }
}

fn worker_loop(
    receiver: mpsc::Receiver<ReportTask>,
    history: Arc<History>,
    threshold_millis: i64,
    receivers: Vec<Box<dyn BlockReceiver>>,
) {
    for task in receiver {
        let snapshot = history.snapshot(task.start_mark, task.end_mark).available();
        let create_time_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let report = BlockReport {
            scene: task.scene,
            metadata: task.metadata,
            threshold_millis,
            start_uptime_millis: task.start_uptime_millis,
            end_uptime_millis: task.end_uptime_millis,
            start_thread_time_millis: task.start_thread_time_millis,
            end_thread_time_millis: task.end_thread_time_millis,
            create_time_millis,
            is_record_available: !snapshot.is_empty(),
            snapshot,
            samples: task.samples,
        };
        for receiver in &receivers {
            receiver.on_block(&report);
        }
    }
}
