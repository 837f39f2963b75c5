/*!
The zone tracker: a single task owning the registry, the presence set, and
the absence timers.

All state transitions run on one task. Scans, admin commands, and timer
fire notices are delivered through channels and processed one at a time,
so the add/remove toggle and the timer bookkeeping for a tag can never
interleave. Callers interact through a cloneable [`TrackerHandle`].
*/

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::config::TrackerConfig;
use crate::core::events::{humanize_secs, EventKind, TagEvent};
use crate::core::registry::{TagId, TagRecord, TagRegistry};
use crate::core::sinks::{EventSink, SinkManager};
use crate::core::timers::{TimerFire, TimerSupervisor};
use crate::error::{TrackerError, TrackerResult};
use crate::store::open_store;

/// How many recent events the tracker keeps for status snapshots
const RECENT_EVENTS: usize = 5;

/// Messages processed one at a time by the tracker task
enum TrackerMessage {
    Scan(TagId),
    Rename {
        id: TagId,
        new_name: String,
        reply: oneshot::Sender<TrackerResult<()>>,
    },
    SetTimeout {
        id: TagId,
        timeout_secs: u64,
        reply: oneshot::Sender<TrackerResult<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<TrackerSnapshot>,
    },
    Shutdown,
}

/// Counters maintained by the tracker task
#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    pub scans_processed: u64,
    pub tags_registered: u64,
    pub alerts_fired: u64,
    pub events_emitted: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the zone
#[derive(Debug, Clone)]
pub struct TrackerSnapshot {
    /// Tags currently in the zone, with display names, in identifier order
    pub present: Vec<(TagId, String)>,
    /// Every registered tag, in identifier order
    pub known_tags: Vec<TagRecord>,
    /// Live absence timers
    pub armed_timers: usize,
    /// The most recent events, oldest first
    pub recent_events: Vec<TagEvent>,
    pub stats: TrackerStats,
}

/// Description of a tag seen for the first time
pub struct NewTag {
    pub display_name: String,
    pub absence_timeout_secs: u64,
}

/// Supplies the name and timeout for tags seen for the first time.
///
/// The tracker awaits this inline, so implementations should answer quickly;
/// a registrar that prompts an operator belongs on its own task feeding
/// renames back through the handle.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn describe_new_tag(&self, id: &TagId) -> NewTag;
}

/// Default registrar: the identifier doubles as the display name
pub struct AutoRegistrar {
    pub default_timeout_secs: u64,
}

#[async_trait]
impl Registrar for AutoRegistrar {
    async fn describe_new_tag(&self, id: &TagId) -> NewTag {
        NewTag {
            display_name: id.as_str().to_string(),
            absence_timeout_secs: self.default_timeout_secs,
        }
    }
}

/// Cloneable handle for feeding scans and admin commands to the tracker
#[derive(Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<TrackerMessage>,
}

impl TrackerHandle {
    /// Report one decoded scan
    pub async fn scan(&self, id: impl Into<TagId>) -> TrackerResult<()> {
        self.tx
            .send(TrackerMessage::Scan(id.into()))
            .await
            .map_err(|_| TrackerError::MailboxClosed)
    }

    /// Change a tag's display name
    pub async fn rename(
        &self,
        id: impl Into<TagId>,
        new_name: impl Into<String>,
    ) -> TrackerResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TrackerMessage::Rename {
                id: id.into(),
                new_name: new_name.into(),
                reply,
            })
            .await
            .map_err(|_| TrackerError::MailboxClosed)?;
        rx.await.map_err(|_| TrackerError::MailboxClosed)?
    }

    /// Change a tag's absence timeout. Takes effect on its next departure;
    /// a timer already counting down keeps its original duration.
    pub async fn set_timeout(
        &self,
        id: impl Into<TagId>,
        timeout: Duration,
    ) -> TrackerResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TrackerMessage::SetTimeout {
                id: id.into(),
                timeout_secs: timeout.as_secs(),
                reply,
            })
            .await
            .map_err(|_| TrackerError::MailboxClosed)?;
        rx.await.map_err(|_| TrackerError::MailboxClosed)?
    }

    /// Point-in-time view of presence, timers, and counters.
    ///
    /// The snapshot is taken after every message queued before this call,
    /// which makes it a sequencing barrier in tests.
    pub async fn snapshot(&self) -> TrackerResult<TrackerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TrackerMessage::Snapshot { reply })
            .await
            .map_err(|_| TrackerError::MailboxClosed)?;
        rx.await.map_err(|_| TrackerError::MailboxClosed)
    }

    /// Ask the tracker to stop once it reaches this message in its queue
    pub async fn shutdown(&self) -> TrackerResult<()> {
        self.tx
            .send(TrackerMessage::Shutdown)
            .await
            .map_err(|_| TrackerError::MailboxClosed)
    }

    /// Pump a stream of decoded identifiers into the tracker. The returned
    /// task ends when the feed or the tracker goes away.
    pub fn attach_feed<S>(&self, feed: S) -> JoinHandle<()>
    where
        S: Stream<Item = TagId> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            futures::pin_mut!(feed);
            while let Some(id) = feed.next().await {
                if tx.send(TrackerMessage::Scan(id)).await.is_err() {
                    break;
                }
            }
            debug!("Scan feed pump finished");
        })
    }
}

/// Owns all tracking state; see the module docs for the threading model
pub struct ZoneTracker {
    registry: TagRegistry,
    presence: HashSet<TagId>,
    timers: TimerSupervisor,
    outputs: SinkManager,
    registrar: Box<dyn Registrar>,
    fire_rx: mpsc::UnboundedReceiver<TimerFire>,
    mailbox: mpsc::Receiver<TrackerMessage>,
    recent: VecDeque<TagEvent>,
    stats: TrackerStats,
}

impl ZoneTracker {
    /// Build a tracker from configuration: open the registry store, construct
    /// the configured sinks, and hand back the tracker with its handle
    pub async fn new(config: TrackerConfig) -> TrackerResult<(Self, TrackerHandle)> {
        let store = open_store(&config.registry.store)?;
        let registry = TagRegistry::open(store).await?;
        let outputs = SinkManager::from_config(&config.outputs)?;
        let (timers, fire_rx) = TimerSupervisor::new();
        let (tx, mailbox) = mpsc::channel(config.feed.channel_capacity);
        let registrar: Box<dyn Registrar> = Box::new(AutoRegistrar {
            default_timeout_secs: config.registry.default_timeout_secs,
        });

        let tracker = Self {
            registry,
            presence: HashSet::new(),
            timers,
            outputs,
            registrar,
            fire_rx,
            mailbox,
            recent: VecDeque::with_capacity(RECENT_EVENTS),
            stats: TrackerStats::default(),
        };
        Ok((tracker, TrackerHandle { tx }))
    }

    /// Replace the default registrar
    pub fn with_registrar(mut self, registrar: Box<dyn Registrar>) -> Self {
        self.registrar = registrar;
        self
    }

    /// Add a sink built outside the configuration
    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.outputs.push(sink);
    }

    /// Run the tracker until shutdown or until every handle is dropped
    pub async fn run(mut self) -> TrackerResult<()> {
        self.outputs.initialize_all().await?;
        info!(
            "🚀 Zone tracker started ({} known tag(s), {} output sink(s))",
            self.registry.len(),
            self.outputs.len()
        );

        loop {
            tokio::select! {
                maybe_msg = self.mailbox.recv() => {
                    match maybe_msg {
                        None | Some(TrackerMessage::Shutdown) => break,
                        Some(msg) => self.handle_message(msg).await,
                    }
                }
                Some(fire) = self.fire_rx.recv() => {
                    self.on_timer_expired(fire).await;
                }
            }
        }

        self.timers.clear();
        self.outputs.finalize_all().await?;
        info!("🏁 Zone tracker stopped");
        Ok(())
    }

    /// Run the tracker on a background task
    pub fn spawn(self) -> JoinHandle<TrackerResult<()>> {
        tokio::spawn(self.run())
    }

    async fn handle_message(&mut self, msg: TrackerMessage) {
        match msg {
            TrackerMessage::Scan(id) => self.on_scan(id).await,
            TrackerMessage::Rename { id, new_name, reply } => {
                let _ = reply.send(self.on_rename(id, new_name).await);
            }
            TrackerMessage::SetTimeout {
                id,
                timeout_secs,
                reply,
            } => {
                let _ = reply.send(self.on_set_timeout(id, timeout_secs).await);
            }
            TrackerMessage::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop before dispatch
            TrackerMessage::Shutdown => {}
        }
    }

    async fn on_scan(&mut self, id: TagId) {
        self.stats.scans_processed += 1;

        // First sighting: the tag goes on record before the toggle runs
        if !self.registry.contains(&id) {
            let NewTag {
                display_name,
                absence_timeout_secs,
            } = self.registrar.describe_new_tag(&id).await;
            let registered = self
                .registry
                .register(id.clone(), display_name.clone(), absence_timeout_secs)
                .await;
            if let Err(e) = registered {
                error!(tag = %id, error = %e, "Registration failed, scan dropped");
                return;
            }
            self.stats.tags_registered += 1;
            let summary = format!("New tag registered: {display_name}");
            self.emit(TagEvent::new(
                EventKind::Registered,
                id.clone(),
                display_name,
                summary,
            ))
            .await;
        }

        let Some(record) = self.registry.lookup(&id) else {
            return;
        };
        let name = record.display_name.clone();
        let timeout = record.absence_timeout();

        if self.presence.remove(&id) {
            // present -> absent: the tag left the zone
            self.emit(TagEvent::new(
                EventKind::Removed,
                id.clone(),
                name.clone(),
                format!("Removed: {name}"),
            ))
            .await;
            if let Some(timeout) = timeout {
                self.timers.start(id, timeout);
            }
        } else {
            // absent -> present: the countdown dies before the entry goes on
            // record, so no stale alert can trail the return
            self.timers.cancel(&id);
            self.presence.insert(id.clone());
            self.emit(TagEvent::new(
                EventKind::Added,
                id.clone(),
                name.clone(),
                format!("Added: {name}"),
            ))
            .await;
        }
    }

    async fn on_timer_expired(&mut self, fire: TimerFire) {
        // Alert only while the notice's generation is current and the tag is
        // still out of the zone
        let Some(elapsed) = self.timers.try_fire(&fire.tag_id, fire.generation) else {
            return;
        };
        if self.presence.contains(&fire.tag_id) {
            return;
        }

        let name = self
            .registry
            .lookup(&fire.tag_id)
            .map(|r| r.display_name.clone())
            .unwrap_or_else(|| fire.tag_id.as_str().to_string());
        let summary = format!("{} absent > {}", name, humanize_secs(elapsed.as_secs()));
        self.stats.alerts_fired += 1;
        warn!(tag = %fire.tag_id, "🚨 {summary}");
        self.emit(TagEvent::new(
            EventKind::AbsenceAlert,
            fire.tag_id.clone(),
            name,
            summary,
        ))
        .await;
    }

    async fn on_rename(&mut self, id: TagId, new_name: String) -> TrackerResult<()> {
        let old_name = match self.registry.lookup(&id) {
            Some(record) => record.display_name.clone(),
            None => return Err(TrackerError::UnknownId(id)),
        };
        self.registry.rename(&id, new_name.clone()).await?;
        let summary = format!("Renamed: {old_name} -> {new_name}");
        self.emit(TagEvent::new(EventKind::Renamed, id, new_name, summary))
            .await;
        Ok(())
    }

    async fn on_set_timeout(&mut self, id: TagId, timeout_secs: u64) -> TrackerResult<()> {
        self.registry
            .set_timeout(&id, Duration::from_secs(timeout_secs))
            .await?;
        let name = self
            .registry
            .lookup(&id)
            .map(|r| r.display_name.clone())
            .unwrap_or_else(|| id.as_str().to_string());
        let summary = if timeout_secs == 0 {
            format!("Absence alerts disabled for {name}")
        } else {
            format!(
                "Absence timeout for {name} set to {}",
                humanize_secs(timeout_secs)
            )
        };
        self.emit(TagEvent::new(EventKind::TimeoutChanged, id, name, summary))
            .await;
        Ok(())
    }

    /// Record the event in the recent ring and fan it out to every sink
    async fn emit(&mut self, event: TagEvent) {
        self.stats.events_emitted += 1;
        self.stats.last_event_at = Some(event.timestamp);
        if self.recent.len() == RECENT_EVENTS {
            self.recent.pop_front();
        }
        self.recent.push_back(event.clone());
        self.outputs.emit_all(&event).await;
    }

    fn snapshot(&self) -> TrackerSnapshot {
        let mut present: Vec<(TagId, String)> = self
            .presence
            .iter()
            .map(|id| {
                let name = self
                    .registry
                    .lookup(id)
                    .map(|r| r.display_name.clone())
                    .unwrap_or_else(|| id.as_str().to_string());
                (id.clone(), name)
            })
            .collect();
        present.sort_by(|a, b| a.0.cmp(&b.0));
        TrackerSnapshot {
            present,
            known_tags: self.registry.records(),
            armed_timers: self.timers.armed(),
            recent_events: self.recent.iter().cloned().collect(),
            stats: self.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{FeedConfig, RegistryConfig, StoreBackend};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CaptureSink {
        events: Arc<Mutex<Vec<TagEvent>>>,
    }

    #[async_trait]
    impl EventSink for CaptureSink {
        fn name(&self) -> &'static str {
            "capture"
        }
        async fn initialize(&mut self) -> TrackerResult<()> {
            Ok(())
        }
        async fn emit(&mut self, event: &TagEvent) -> TrackerResult<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
        async fn finalize(&mut self) -> TrackerResult<()> {
            Ok(())
        }
    }

    fn test_config(default_timeout_secs: u64) -> TrackerConfig {
        TrackerConfig {
            registry: RegistryConfig {
                store: StoreBackend::Memory,
                default_timeout_secs,
            },
            feed: FeedConfig {
                channel_capacity: 16,
            },
            outputs: Vec::new(),
        }
    }

    async fn tracker_with_capture(
        default_timeout_secs: u64,
    ) -> (ZoneTracker, TrackerHandle, Arc<Mutex<Vec<TagEvent>>>) {
        let (mut tracker, handle) = ZoneTracker::new(test_config(default_timeout_secs))
            .await
            .unwrap();
        let sink = CaptureSink::default();
        let events = sink.events.clone();
        tracker.add_sink(Box::new(sink));
        (tracker, handle, events)
    }

    fn kinds(events: &Arc<Mutex<Vec<TagEvent>>>) -> Vec<EventKind> {
        events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn first_scan_registers_then_enters() {
        let (mut tracker, _handle, events) = tracker_with_capture(300).await;
        tracker.on_scan(TagId::from("T1")).await;

        assert_eq!(kinds(&events), vec![EventKind::Registered, EventKind::Added]);
        assert!(tracker.presence.contains(&TagId::from("T1")));
        assert_eq!(tracker.timers.armed(), 0);
        assert_eq!(tracker.stats.tags_registered, 1);
        assert_eq!(tracker.stats.scans_processed, 1);
    }

    #[tokio::test]
    async fn second_scan_departs_and_arms_timer() {
        let (mut tracker, _handle, events) = tracker_with_capture(300).await;
        tracker.on_scan(TagId::from("T1")).await;
        tracker.on_scan(TagId::from("T1")).await;

        assert_eq!(kinds(&events).last(), Some(&EventKind::Removed));
        assert!(!tracker.presence.contains(&TagId::from("T1")));
        assert_eq!(tracker.timers.armed(), 1);
    }

    #[tokio::test]
    async fn return_scan_cancels_timer() {
        let (mut tracker, _handle, events) = tracker_with_capture(300).await;
        tracker.on_scan(TagId::from("T1")).await;
        tracker.on_scan(TagId::from("T1")).await;
        tracker.on_scan(TagId::from("T1")).await;

        assert_eq!(kinds(&events).last(), Some(&EventKind::Added));
        assert!(tracker.presence.contains(&TagId::from("T1")));
        assert_eq!(tracker.timers.armed(), 0);
    }

    #[tokio::test]
    async fn zero_timeout_departure_arms_nothing() {
        let (mut tracker, _handle, events) = tracker_with_capture(0).await;
        tracker.on_scan(TagId::from("T1")).await;
        tracker.on_scan(TagId::from("T1")).await;

        assert_eq!(kinds(&events).last(), Some(&EventKind::Removed));
        assert_eq!(tracker.timers.armed(), 0);
    }

    #[tokio::test]
    async fn stale_generation_notice_is_ignored() {
        let (mut tracker, _handle, events) = tracker_with_capture(300).await;
        tracker.on_scan(TagId::from("T1")).await;
        tracker.on_scan(TagId::from("T1")).await;
        let live = tracker.timers.current_generation(&TagId::from("T1")).unwrap();

        tracker
            .on_timer_expired(TimerFire {
                tag_id: TagId::from("T1"),
                generation: live + 1000,
            })
            .await;

        assert!(!kinds(&events).contains(&EventKind::AbsenceAlert));
        // The live timer survives a stale notice
        assert_eq!(tracker.timers.armed(), 1);
    }

    #[tokio::test]
    async fn current_generation_notice_fires_alert() {
        let (mut tracker, _handle, events) = tracker_with_capture(300).await;
        tracker.on_scan(TagId::from("T1")).await;
        tracker.on_scan(TagId::from("T1")).await;
        let live = tracker.timers.current_generation(&TagId::from("T1")).unwrap();

        tracker
            .on_timer_expired(TimerFire {
                tag_id: TagId::from("T1"),
                generation: live,
            })
            .await;

        let captured = events.lock().unwrap();
        let alert = captured
            .iter()
            .find(|e| e.kind == EventKind::AbsenceAlert)
            .expect("alert emitted");
        assert_eq!(alert.summary, "T1 absent > 5m");
        drop(captured);
        assert_eq!(tracker.timers.armed(), 0);
        assert_eq!(tracker.stats.alerts_fired, 1);
    }

    #[tokio::test]
    async fn alert_suppressed_while_tag_is_present() {
        let (mut tracker, _handle, events) = tracker_with_capture(300).await;
        tracker.on_scan(TagId::from("T1")).await;

        // Fabricate a countdown that somehow survived the return
        let generation = tracker
            .timers
            .start(TagId::from("T1"), Duration::from_secs(300));
        tracker
            .on_timer_expired(TimerFire {
                tag_id: TagId::from("T1"),
                generation,
            })
            .await;

        assert!(!kinds(&events).contains(&EventKind::AbsenceAlert));
        assert_eq!(tracker.stats.alerts_fired, 0);
    }

    #[tokio::test]
    async fn rename_updates_registry_and_emits() {
        let (mut tracker, _handle, events) = tracker_with_capture(300).await;
        tracker.on_scan(TagId::from("T1")).await;

        tracker
            .on_rename(TagId::from("T1"), "Box A".to_string())
            .await
            .unwrap();

        let record = tracker.registry.lookup(&TagId::from("T1")).unwrap();
        assert_eq!(record.display_name, "Box A");
        let captured = events.lock().unwrap();
        let renamed = captured.iter().find(|e| e.kind == EventKind::Renamed).unwrap();
        assert_eq!(renamed.summary, "Renamed: T1 -> Box A");
    }

    #[tokio::test]
    async fn rename_unknown_tag_emits_nothing() {
        let (mut tracker, _handle, events) = tracker_with_capture(300).await;
        let err = tracker
            .on_rename(TagId::from("GHOST"), "Ghost".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::UnknownId(_)));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_change_applies_to_next_departure() {
        let (mut tracker, _handle, events) = tracker_with_capture(0).await;
        tracker.on_scan(TagId::from("T1")).await;
        assert_eq!(tracker.timers.armed(), 0);

        tracker
            .on_set_timeout(TagId::from("T1"), 60)
            .await
            .unwrap();
        tracker.on_scan(TagId::from("T1")).await;

        assert_eq!(tracker.timers.armed(), 1);
        let captured = events.lock().unwrap();
        let changed = captured
            .iter()
            .find(|e| e.kind == EventKind::TimeoutChanged)
            .unwrap();
        assert_eq!(changed.summary, "Absence timeout for T1 set to 1m");
    }

    #[tokio::test]
    async fn disabling_timeout_reports_it() {
        let (mut tracker, _handle, events) = tracker_with_capture(300).await;
        tracker.on_scan(TagId::from("T1")).await;
        tracker.on_set_timeout(TagId::from("T1"), 0).await.unwrap();

        let captured = events.lock().unwrap();
        let changed = captured
            .iter()
            .find(|e| e.kind == EventKind::TimeoutChanged)
            .unwrap();
        assert_eq!(changed.summary, "Absence alerts disabled for T1");
    }

    #[tokio::test]
    async fn recent_ring_keeps_last_five() {
        let (mut tracker, _handle, _events) = tracker_with_capture(300).await;
        for id in ["A", "B", "C", "D"] {
            tracker.on_scan(TagId::from(id)).await;
        }

        // Four first sightings produce eight events; only five remain
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.recent_events.len(), 5);
        assert_eq!(snapshot.stats.events_emitted, 8);
        assert_eq!(snapshot.recent_events.last().unwrap().kind, EventKind::Added);
        assert_eq!(snapshot.recent_events.last().unwrap().tag_id, TagId::from("D"));
    }

    #[tokio::test]
    async fn snapshot_lists_present_and_known() {
        let (mut tracker, _handle, _events) = tracker_with_capture(300).await;
        tracker.on_scan(TagId::from("B")).await;
        tracker.on_scan(TagId::from("A")).await;
        tracker.on_scan(TagId::from("B")).await; // B departs

        let snapshot = tracker.snapshot();
        let present_ids: Vec<&str> = snapshot.present.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(present_ids, vec!["A"]);
        assert_eq!(snapshot.known_tags.len(), 2);
        assert_eq!(snapshot.armed_timers, 1);
    }
}
