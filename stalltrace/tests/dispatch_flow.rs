//! End-to-end dispatch monitoring flow with a synthetic event-loop driver.

use std::{
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

use stalltrace::{
    AnrConfig, BlockConfig, CompositeLooperCallback, History, HistoryConfig, LooperDispatcher,
    Metadata, Scene, SegmentCollector,
    analyzer::{
        AnrWatchdog, BlockAnalyzer, BlockReceiver, BlockReport, MainTaskPoster,
        ProcessErrorLookup, ProcessErrorState, Sample, SampleProvider,
    },
};

struct FixedStack;
impl SampleProvider for FixedStack {
    fn sample(&self) -> Option<Sample> {
        Some(Sample {
            uptime_millis: 0,
            stack: "com.app.Main.run".into(),
        })
    }
}

struct Forward(mpsc::Sender<BlockReport>);
impl BlockReceiver for Forward {
    fn on_block(&self, report: &BlockReport) {
        let _ = self.0.send(report.clone());
    }
}

fn history() -> Arc<History> {
    Arc::new(
        History::new(HistoryConfig {
            recorder_capacity: 256,
            merger_capacity: 16,
            ..HistoryConfig::default()
        })
        .expect("valid config"),
    )
}

#[test]
fn slow_dispatch_produces_block_report_and_tree() {
    let history = history();
    let collector = Arc::new(SegmentCollector::new(history.merger()));
    let (report_tx, report_rx) = mpsc::channel();
    let analyzer = Arc::new(
        BlockAnalyzer::new(
            history.clone(),
            BlockConfig {
                threshold_millis: 30,
                sample_interval_millis: 10,
            },
            Arc::new(FixedStack),
            vec![Box::new(Forward(report_tx))],
        )
        .expect("valid config"),
    );

    let composite = CompositeLooperCallback::new();
    composite.set_first(collector.clone());
    composite.add(analyzer.clone());
    composite.immutable();
    let dispatcher = LooperDispatcher::new(history.clone(), Arc::new(composite));

    // A fast dispatch, then a slow one that crosses the threshold.
    dispatcher.start(Scene::Message, Metadata::None);
    history.enter(10);
    history.exit(10);
    dispatcher.end(Scene::Message, Metadata::None);

    dispatcher.start(Scene::Message, Metadata::None);
    history.enter(20);
    history.enter(21);
    thread::sleep(Duration::from_millis(120));
    history.exit(21);
    history.exit(20);
    dispatcher.end(
        Scene::Message,
        Metadata::MessageLog(">>>>> Dispatching to Handler".into()),
    );

    let report = report_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("block report");
    assert_eq!(report.scene, Scene::Message);
    assert_eq!(report.metadata, ">>>>> Dispatching to Handler");
    assert!(report.wall_duration_millis() >= 30);
    assert!(report.is_record_available);
    assert!(!report.samples.is_empty());

    // The captured records reconstruct the nested call that stalled.
    let tree = report.snapshot.build_tree(report.end_uptime_millis);
    let slice = &tree.children[0];
    assert!(slice.is_complete);
    let outer = &slice.children[0];
    assert_eq!(outer.id, 20);
    assert!(outer.duration_ms() >= 100);
    assert_eq!(outer.children[0].id, 21);

    // Both dispatches landed in the merged timeline; the slow one cannot
    // have folded into the fast one (merge threshold exceeded).
    let ranges = collector.copy();
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[1].wall_duration_millis(), report.wall_duration_millis());
}

#[test]
fn fast_dispatches_stay_silent_and_merge() {
    let history = history();
    let collector = Arc::new(SegmentCollector::new(history.merger()));
    let (report_tx, report_rx) = mpsc::channel();
    let analyzer = Arc::new(
        BlockAnalyzer::new(
            history.clone(),
            BlockConfig::default(),
            Arc::new(FixedStack),
            vec![Box::new(Forward(report_tx))],
        )
        .expect("valid config"),
    );

    let composite = CompositeLooperCallback::new();
    composite.set_first(collector.clone());
    composite.add(analyzer.clone());
    let dispatcher = LooperDispatcher::new(history.clone(), Arc::new(composite));

    for _ in 0..5 {
        dispatcher.start(Scene::Message, Metadata::None);
        dispatcher.end(Scene::Message, Metadata::None);
    }

    let ranges = collector.copy();
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].count(), 5);
    assert!(report_rx.try_recv().is_err());
}

/// Poster backed by a live worker acting as the monitored thread.
struct ChannelPoster(mpsc::Sender<Box<dyn FnOnce() + Send>>);
impl MainTaskPoster for ChannelPoster {
    fn post(&self, task: Box<dyn FnOnce() + Send>) {
        let _ = self.0.send(task);
    }
}

struct ErrorEntry;
impl ProcessErrorLookup for ErrorEntry {
    fn lookup(&self) -> Option<ProcessErrorState> {
        Some(ProcessErrorState {
            pid: 7,
            tag: "app".to_string(),
            short_message: "ANR in com.app".to_string(),
            long_message: "Input dispatching timed out".to_string(),
        })
    }
}

#[test]
fn watchdog_fires_only_while_probes_go_unanswered() {
    let (task_tx, task_rx) = mpsc::channel::<Box<dyn FnOnce() + Send>>();
    let pump = thread::spawn(move || {
        // Run probes promptly, as a healthy event loop would, until the
        // channel closes.
        for task in task_rx {
            task();
        }
    });

    let (anr_tx, anr_rx) = mpsc::channel();
    let watchdog = AnrWatchdog::new(
        AnrConfig {
            interval_millis: 30,
        },
        Arc::new(ChannelPoster(task_tx)),
        Arc::new(ErrorEntry),
    )
    .expect("valid config");
    watchdog.start(move |state| {
        let _ = anr_tx.send(state);
    });

    thread::sleep(Duration::from_millis(150));
    assert!(anr_rx.try_recv().is_err());

    watchdog.stop();
    // Dropping the watchdog releases the poster, closing the task channel.
    drop(watchdog);
    pump.join().unwrap();
}
