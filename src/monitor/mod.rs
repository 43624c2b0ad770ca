//! Frame monitor: the long-running task between a frame source and the sinks.
//!
//! ```text
//! source ──Option<String>──► decode ──► diff vs previous ──► EventSink
//!                              │
//!                              └──► watch::Sender<Snapshot> (latest state)
//! ```
//!
//! Frames are handled strictly in arrival order; the diff is pairwise so
//! reordering would produce phantom transitions. A `None` frame (record
//! deleted, wrong payload type) publishes the baseline snapshot but leaves
//! the diff baseline untouched.
//!
//! The task is controlled through [`MonitorHandle`], modelled on a small
//! command channel plus oneshot replies.
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::events::{diff_snapshots, ChangeEvent, LogCategory};
use crate::logutil::escape_frame;
use crate::metrics;
use crate::protocol::{
    encode_command, CommandRecord, Diagnostic, DiagnosticSink, FrameDecoder, FrameMarkers,
    MasterStatus, Operation, Snapshot,
};
use crate::storage::{CommandLog, EventLog};

/// Receives each non-empty batch of change events.
pub trait EventSink: Send {
    fn deliver(&mut self, events: &[ChangeEvent], snapshot: &Snapshot) -> Result<()>;
}

impl EventSink for EventLog {
    fn deliver(&mut self, events: &[ChangeEvent], snapshot: &Snapshot) -> Result<()> {
        self.append(events, snapshot).map(|_| ())
    }
}

/// Writes events to the `log` facade: alarms at warn, the rest at info.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn deliver(&mut self, events: &[ChangeEvent], _snapshot: &Snapshot) -> Result<()> {
        for event in events {
            match event.category() {
                LogCategory::Alarm | LogCategory::Trouble => warn!("{}", event),
                _ => info!("{}", event),
            }
        }
        Ok(())
    }
}

/// Forwards batches over a channel.
pub struct ChannelSink(pub mpsc::UnboundedSender<Vec<ChangeEvent>>);

impl EventSink for ChannelSink {
    fn deliver(&mut self, events: &[ChangeEvent], _snapshot: &Snapshot) -> Result<()> {
        self.0
            .send(events.to_vec())
            .map_err(|_| anyhow!("event channel closed"))
    }
}

/// Delivers to every inner sink; the first failure is returned after all
/// sinks have been tried.
#[derive(Default)]
pub struct FanoutSink(pub Vec<Box<dyn EventSink>>);

impl EventSink for FanoutSink {
    fn deliver(&mut self, events: &[ChangeEvent], snapshot: &Snapshot) -> Result<()> {
        let mut first_err = None;
        for sink in self.0.iter_mut() {
            if let Err(e) = sink.deliver(events, snapshot) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Accepts encoded commands for delivery to the panel.
#[allow(async_fn_in_trait)]
pub trait CommandSink {
    async fn submit(&self, record: &CommandRecord) -> Result<()>;
}

impl CommandSink for CommandLog {
    async fn submit(&self, record: &CommandRecord) -> Result<()> {
        self.append(record)
    }
}

/// Encode `op` against `current` and hand the record to `sink`.
pub async fn dispatch_command<S: CommandSink>(
    sink: &S,
    op: Operation,
    current: &MasterStatus,
) -> Result<CommandRecord> {
    let cmd = encode_command(op, current);
    let record = CommandRecord::pending(&cmd);
    sink.submit(&record).await?;
    info!(
        "Command {} queued: status byte {} ({})",
        record.operation, record.status_byte, record.new_status
    );
    Ok(record)
}

/// Counts diagnostics into the global metrics and logs them.
struct MeteredDiagnostics;

impl DiagnosticSink for MeteredDiagnostics {
    fn report(&mut self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::MissingStartMarker => metrics::inc_frames_rejected(),
            Diagnostic::BadStatusByte { .. } => {}
            _ => metrics::inc_segments_discarded(),
        }
        debug!("frame decode: {}", diagnostic);
    }
}

/// Decode + diff state machine, without the task around it.
pub struct Pipeline {
    decoder: FrameDecoder,
    previous: Snapshot,
}

impl Pipeline {
    pub fn new(markers: FrameMarkers) -> Self {
        Self {
            decoder: FrameDecoder::new(markers),
            previous: Snapshot::empty(),
        }
    }

    /// Snapshot the next frame will be diffed against.
    pub fn previous(&self) -> &Snapshot {
        &self.previous
    }

    /// Process one frame; returns the snapshot to publish and its events.
    pub fn ingest(&mut self, raw: Option<&str>) -> (Snapshot, Vec<ChangeEvent>) {
        metrics::inc_frames_received();
        let Some(raw) = raw else {
            metrics::inc_frames_rejected();
            debug!("No frame payload; publishing baseline");
            return (Snapshot::baseline(), Vec::new());
        };
        debug!("Frame: {}", escape_frame(raw));
        let snapshot = self.decoder.decode_with(Some(raw), &mut MeteredDiagnostics);
        let events = diff_snapshots(&self.previous, &snapshot);
        metrics::add_events_emitted(events.len());
        self.previous = snapshot.clone();
        (snapshot, events)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    pub markers: FrameMarkers,
    /// Period of the stats log line; `None` disables it.
    pub stats_interval: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub frames: u64,
    pub events: u64,
    pub sink_errors: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
}

enum MonitorCommand {
    Stats(oneshot::Sender<MonitorStats>),
    Shutdown(oneshot::Sender<()>),
}

pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<MonitorCommand>,
    snapshots: watch::Receiver<Snapshot>,
    task: JoinHandle<Snapshot>,
}

impl MonitorHandle {
    /// Receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub async fn stats(&self) -> Option<MonitorStats> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(MonitorCommand::Stats(tx)).is_ok() {
            rx.await.ok()
        } else {
            None
        }
    }

    /// Stop the task and return the last decoded snapshot.
    pub async fn shutdown(self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(MonitorCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        self.join().await
    }

    /// Wait for the frame source to close.
    pub async fn join(self) -> Result<Snapshot> {
        self.task
            .await
            .map_err(|e| anyhow!("monitor task failed: {}", e))
    }
}

pub fn start_monitor(
    cfg: MonitorConfig,
    mut frames: mpsc::UnboundedReceiver<Option<String>>,
    mut sink: Box<dyn EventSink>,
) -> MonitorHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<MonitorCommand>();
    let (snap_tx, snap_rx) = watch::channel(Snapshot::baseline());
    let mut pipeline = Pipeline::new(cfg.markers);

    let task = tokio::spawn(async move {
        let mut stats = MonitorStats::default();
        let log_stats = cfg.stats_interval.is_some();
        let period = cfg.stats_interval.unwrap_or(Duration::from_secs(3600));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                Some(cmd) = rx.recv() => match cmd {
                    MonitorCommand::Stats(resp) => { let _ = resp.send(stats.clone()); }
                    MonitorCommand::Shutdown(done) => { let _ = done.send(()); break; }
                },
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        debug!("Frame source closed");
                        break;
                    };
                    let (snapshot, events) = pipeline.ingest(frame.as_deref());
                    stats.frames += 1;
                    stats.last_frame_at = Some(Utc::now());
                    if !events.is_empty() {
                        stats.events += events.len() as u64;
                        if let Err(e) = sink.deliver(&events, &snapshot) {
                            stats.sink_errors += 1;
                            metrics::inc_sink_failures();
                            warn!("Event sink failed: {}", e);
                        }
                    }
                    let _ = snap_tx.send(snapshot);
                }
                _ = ticker.tick(), if log_stats => {
                    let m = metrics::snapshot();
                    info!(
                        "monitor stats: frames={} events={} rejected={} discarded_segments={} sink_errors={}",
                        stats.frames, stats.events, m.frames_rejected, m.segments_discarded, stats.sink_errors
                    );
                }
            }
        }
        pipeline.previous().clone()
    });

    MonitorHandle {
        tx,
        snapshots: snap_rx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeKind;
    use crate::protocol::SlaveState;

    #[test]
    fn pipeline_keeps_previous_on_missing_frame() {
        let mut p = Pipeline::new(FrameMarkers::default());
        let (_, events) = p.ingest(Some("40FF<STX>010000<ETX>"));
        assert_eq!(events.len(), 1);

        let (snap, events) = p.ingest(None);
        assert!(events.is_empty());
        assert_eq!(snap, Snapshot::baseline());
        assert!(p.previous().slave(1).unwrap().online);

        // same frame again: nothing changed relative to the kept baseline
        let (_, events) = p.ingest(Some("40FF<STX>010000<ETX>"));
        assert!(events.is_empty());
    }

    #[test]
    fn pipeline_markerless_frame_resets_slaves() {
        let mut p = Pipeline::new(FrameMarkers::default());
        p.ingest(Some("40FF<STX>010000<ETX>"));
        let (snap, events) = p.ingest(Some("garbage"));
        assert_eq!(snap.slave(1).unwrap().status, SlaveState::Offline);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::SlaveOffline);
    }

    #[test]
    fn fanout_reports_first_failure() {
        struct Failing;
        impl EventSink for Failing {
            fn deliver(&mut self, _: &[ChangeEvent], _: &Snapshot) -> Result<()> {
                Err(anyhow!("disk full"))
            }
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut fan = FanoutSink(vec![Box::new(Failing), Box::new(ChannelSink(tx))]);
        let snap = Snapshot::baseline();
        let event = ChangeEvent {
            kind: ChangeKind::AlarmCleared,
            subject_address: None,
            detail: "All alarms cleared".into(),
            state: None,
        };
        let err = fan.deliver(&[event], &snap).unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(rx.try_recv().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn monitor_publishes_and_delivers() {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let handle = start_monitor(
            MonitorConfig::default(),
            frame_rx,
            Box::new(ChannelSink(event_tx)),
        );
        let mut snaps = handle.subscribe();

        frame_tx
            .send(Some("40FF<STX>020000<ETX>".to_string()))
            .unwrap();
        let batch = event_rx.recv().await.unwrap();
        assert_eq!(batch[0].kind, ChangeKind::SlaveOnline);
        snaps.changed().await.unwrap();
        assert!(snaps.borrow().slave(2).unwrap().online);

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.events, 1);

        let last = handle.shutdown().await.unwrap();
        assert!(last.slave(2).unwrap().online);
    }

    #[tokio::test]
    async fn command_log_as_sink() {
        let tmp = tempfile::tempdir().unwrap();
        let log = CommandLog::open(tmp.path()).unwrap();
        let rec = dispatch_command(&log, Operation::SystemReset, &MasterStatus::default())
            .await
            .unwrap();
        assert_eq!(rec.status_byte, "DF");
        assert_eq!(log.history(5).unwrap()[0].id, rec.id);
    }
}
