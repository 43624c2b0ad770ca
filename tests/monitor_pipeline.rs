/// Integration tests for the monitor task: stream source through decode and
/// diff into the event log and the snapshot watch channel.
use firewatch::events::{ChangeKind, LogCategory};
use firewatch::monitor::{
    start_monitor, ChannelSink, EventSink, FanoutSink, MonitorConfig,
};
use firewatch::protocol::{FrameMarkers, SlaveState};
use firewatch::source::spawn_reader;
use firewatch::storage::EventLog;
use tempfile::tempdir;
use tokio::sync::mpsc;

const CAPTURE: &[u8] = b"$40FF<STX>010000<STX>020000<ETX>\r\n\
$40EF<STX>010000<STX>020001<ETX>\r\n\
$40EF<STX>010000<STX>020001<ETX>\r\n\
$40FF<STX>010000<STX>020000<ETX>\r\n";

#[tokio::test]
async fn test_stream_to_event_log() {
    let dir = tempdir().unwrap();
    let log = EventLog::open(dir.path()).unwrap();

    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let monitor = start_monitor(MonitorConfig::default(), frame_rx, Box::new(log));
    let reader = spawn_reader(CAPTURE, &FrameMarkers::default(), frame_tx);
    assert_eq!(reader.await.unwrap().unwrap(), 4);

    // Source closed, so the task finishes by itself.
    let last = monitor.join().await.unwrap();
    assert_eq!(last.slave(2).unwrap().status, SlaveState::Normal);

    let log = EventLog::open(dir.path()).unwrap();
    let entries = log.recent(100, None).unwrap();
    let kinds: Vec<ChangeKind> = entries.iter().rev().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::SlaveOnline,
            ChangeKind::SlaveOnline,
            ChangeKind::AlarmRaised,
            ChangeKind::SlaveStatusChanged,
            ChangeKind::AlarmCleared,
            ChangeKind::SlaveStatusChanged,
        ]
    );
    assert_eq!(log.counts().unwrap().alarm, 2);
    let alarms = log.recent(10, Some(LogCategory::Alarm)).unwrap();
    assert_eq!(alarms[0].details, "Fire alarm in slave 2. Zones: 1");
    assert_eq!(alarms[0].slave.as_ref().unwrap().status, SlaveState::Alarm);
}

/// Serial captures carry CR/LF and 0x85 inside frames; they must not split a
/// frame or hide a slave in alarm.
#[tokio::test]
async fn test_noise_inside_frames_survives_stream_path() {
    let capture: &[u8] = b"$405F\r\n<STX>010000<STX>020022<ETX>\r\n\
$40\x855F<STX>010000\r\n<STX>020022\x85<ETX>\r\n";
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let monitor = start_monitor(
        MonitorConfig::default(),
        frame_rx,
        Box::new(ChannelSink(event_tx)),
    );
    let reader = spawn_reader(capture, &FrameMarkers::default(), frame_tx);
    assert_eq!(reader.await.unwrap().unwrap(), 2);

    let last = monitor.join().await.unwrap();
    assert!(last.master.is_some());
    assert_eq!(last.slave(1).unwrap().status, SlaveState::Normal);
    assert_eq!(last.slave(2).unwrap().status, SlaveState::Alarm);
    assert!(last.slave(2).unwrap().bell_active);

    // Only the first frame brings slaves online; the repeat is identical.
    let first = event_rx.recv().await.unwrap();
    let kinds: Vec<ChangeKind> = first.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ChangeKind::SlaveOnline, ChangeKind::SlaveOnline]);
    assert_eq!(first[1].state, Some(SlaveState::Alarm));
    assert!(event_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_missing_frame_publishes_baseline_but_keeps_history() {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let monitor = start_monitor(
        MonitorConfig::default(),
        frame_rx,
        Box::new(ChannelSink(event_tx)),
    );
    let mut snaps = monitor.subscribe();

    frame_tx.send(Some("40FF<STX>030000<ETX>".into())).unwrap();
    assert_eq!(event_rx.recv().await.unwrap()[0].kind, ChangeKind::SlaveOnline);
    snaps.changed().await.unwrap();

    frame_tx.send(None).unwrap();
    snaps.changed().await.unwrap();
    assert!(!snaps.borrow().slave(3).unwrap().online);
    assert!(monitor.latest().master.is_none());

    // Same frame as before the gap: no transition relative to it.
    frame_tx.send(Some("40FF<STX>030000<ETX>".into())).unwrap();
    snaps.changed().await.unwrap();
    assert!(snaps.borrow().slave(3).unwrap().online);
    assert!(event_rx.try_recv().is_err());

    let stats = monitor.stats().await.unwrap();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.events, 1);
    assert!(stats.last_frame_at.is_some());
    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sink_failure_does_not_stop_monitor() {
    struct Broken;
    impl EventSink for Broken {
        fn deliver(
            &mut self,
            _events: &[firewatch::events::ChangeEvent],
            _snapshot: &firewatch::protocol::Snapshot,
        ) -> anyhow::Result<()> {
            anyhow::bail!("sink offline")
        }
    }

    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let sink = FanoutSink(vec![Box::new(Broken), Box::new(ChannelSink(event_tx))]);
    let monitor = start_monitor(MonitorConfig::default(), frame_rx, Box::new(sink));

    frame_tx.send(Some("40FF<STX>010000<ETX>".into())).unwrap();
    frame_tx.send(Some("40FF<STX>01<ETX>".into())).unwrap();
    assert_eq!(event_rx.recv().await.unwrap()[0].kind, ChangeKind::SlaveOnline);
    assert_eq!(event_rx.recv().await.unwrap()[0].kind, ChangeKind::SlaveOffline);

    let stats = monitor.stats().await.unwrap();
    assert_eq!(stats.sink_errors, 2);
    drop(frame_tx);
    let last = monitor.join().await.unwrap();
    assert!(!last.slave(1).unwrap().online);
}
