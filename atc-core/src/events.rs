//! Event types and fan-out bus to UI/stats consumers (§4.6).
//!
//! `dictum_core::ipc::events` is the teacher's event-type module, generalized
//! from its `TranscriptEvent`/`EngineStatusEvent`/`AudioActivityEvent` trio
//! (serde, `camelCase` rename, colocated round-trip tests) to a single tagged
//! [`MonitorEvent`] enum covering the seven kinds this system emits, carried
//! on a `tokio::sync::broadcast` channel exactly as `DictumEngine` wires its
//! senders. The soft-cap/batching behavior has no broadcast-channel
//! equivalent (a lagged receiver already drops oldest on overflow, but that
//! alone doesn't give bounded batches) — [`TransmissionBatcher`] is new,
//! grounded directly in the interval/max-batch parameters §4.6 gives.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::correlator::{Alert as CorrelatorAlert, Severity};
use crate::models::{Contact, Transmission};
use crate::transcription::WorkerStatus;

/// Broadcast channel capacity — matches the teacher's `BROADCAST_CAP`.
const BROADCAST_CAP: usize = 256;

/// Default soft cap on queued transmissions before the batcher starts
/// dropping the oldest unflushed ones (§4.6, default 100).
pub const DEFAULT_SOFT_CAP: usize = 100;
/// Default minimum interval between batcher flushes (§4.6, default 0.5s).
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(500);
/// Default maximum number of transmissions flushed in one batch (§4.6, default 20).
pub const DEFAULT_MAX_BATCH: usize = 20;

/// One new recording segment was written for a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecordingEvent {
    pub channel_id: String,
    pub path: String,
}

/// One or more new transmissions were transcribed on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtcTransmissionEvent {
    pub channel_id: String,
    pub transmissions: Vec<Transmission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatusEvent {
    pub worker_id: usize,
    pub status: WorkerStatus,
}

/// Rolling operational statistics, sampled once per second.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatsUpdateEvent {
    pub channel_stats: Vec<ChannelStats>,
    pub correlator_api_calls: u64,
    pub correlator_total_tokens: u64,
    pub correlator_errors: u64,
    pub correlator_avg_response_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub channel_id: String,
    pub transmission_count: u64,
    pub non_transponder_alerts: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAircraftEvent {
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub channel_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub callsign: Option<String>,
    pub details: String,
    pub severity: Severity,
    pub confidence: f32,
}

impl AlertEvent {
    pub fn from_correlator_alert(channel_id: impl Into<String>, alert: &CorrelatorAlert) -> Self {
        Self {
            channel_id: channel_id.into(),
            kind: alert.kind.clone(),
            callsign: alert.callsign.clone(),
            details: alert.details.clone(),
            severity: alert.severity,
            confidence: alert.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsInitializedEvent {
    pub channel_ids: Vec<String>,
}

/// All seven event kinds the Monitor publishes (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MonitorEvent {
    ChannelRecording(ChannelRecordingEvent),
    AtcTransmission(AtcTransmissionEvent),
    WorkerStatus(WorkerStatusEvent),
    StatsUpdate(StatsUpdateEvent),
    UpdateAircraft(UpdateAircraftEvent),
    Alert(AlertEvent),
    ChannelsInitialized(ChannelsInitializedEvent),
}

/// Fan-out bus: one broadcast sender shared by every producer, with each
/// subscriber getting its own bounded receiver queue.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Silently drops it if there are no subscribers —
    /// matches `broadcast::Sender::send`'s existing semantics, which the
    /// teacher's engine also ignores (`let _ = status_tx.send(...)`).
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Batches `atc_transmission` events for a single channel, flushing at most
/// once per `interval` and at most `max_batch` transmissions per flush, and
/// dropping the oldest queued transmission once more than `soft_cap` are
/// pending (§4.6, bullet 2).
pub struct TransmissionBatcher {
    channel_id: String,
    bus: EventBus,
    interval: Duration,
    max_batch: usize,
    soft_cap: usize,
    pending: Vec<Transmission>,
}

impl TransmissionBatcher {
    pub fn new(channel_id: impl Into<String>, bus: EventBus) -> Self {
        Self {
            channel_id: channel_id.into(),
            bus,
            interval: DEFAULT_BATCH_INTERVAL,
            max_batch: DEFAULT_MAX_BATCH,
            soft_cap: DEFAULT_SOFT_CAP,
            pending: Vec::new(),
        }
    }

    /// Queue a transmission for the next flush, dropping the oldest pending
    /// one if the soft cap is exceeded.
    pub fn push(&mut self, tx: Transmission) {
        self.pending.push(tx);
        if self.pending.len() > self.soft_cap {
            let overflow = self.pending.len() - self.soft_cap;
            self.pending.drain(0..overflow);
        }
    }

    /// Drain up to `max_batch` pending transmissions (oldest first) and
    /// publish them as one `atc_transmission` event, if any are pending.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let take = self.pending.len().min(self.max_batch);
        let batch: Vec<Transmission> = self.pending.drain(0..take).collect();
        self.bus.publish(MonitorEvent::AtcTransmission(AtcTransmissionEvent {
            channel_id: self.channel_id.clone(),
            transmissions: batch,
        }));
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Spawn the batcher as its own task: ticks `flush` every `interval`,
    /// accepts pushes from [`BatcherHandle::push`], and flushes whatever is
    /// still pending when `token` is cancelled, before exiting.
    pub fn spawn(
        channel_id: impl Into<String>,
        bus: EventBus,
        token: CancellationToken,
    ) -> (JoinHandle<()>, BatcherHandle) {
        let mut batcher = Self::new(channel_id, bus);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(batcher.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        while let Ok(tx) = rx.try_recv() {
                            batcher.push(tx);
                        }
                        batcher.flush();
                        return;
                    }
                    _ = ticker.tick() => {
                        batcher.flush();
                    }
                    Some(tx) = rx.recv() => {
                        batcher.push(tx);
                    }
                }
            }
        });

        (handle, BatcherHandle { tx })
    }
}

/// Handle for pushing transmissions into a [`TransmissionBatcher`] running on
/// its own task, from whichever task produced the transmission.
#[derive(Clone)]
pub struct BatcherHandle {
    tx: mpsc::UnboundedSender<Transmission>,
}

impl BatcherHandle {
    /// Queue a transmission for the batcher's next flush. Silently dropped
    /// if the batcher's task has already exited.
    pub fn push(&self, tx: Transmission) {
        let _ = self.tx.send(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tx(id: u64) -> Transmission {
        Transmission {
            id,
            channel_id: "PDX Tower".into(),
            frequency: "118.7".into(),
            timestamp: Utc::now(),
            segments: Vec::new(),
            text: format!("tx {id}"),
            audio_duration_secs: 1.0,
            transcription_delay_secs: 0.1,
        }
    }

    #[test]
    fn monitor_event_tags_and_camel_cases_variants() {
        let event = MonitorEvent::ChannelsInitialized(ChannelsInitializedEvent {
            channel_ids: vec!["PDX Tower".into()],
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "channelsInitialized");
        assert_eq!(json["channelIds"][0], "PDX Tower");
    }

    #[test]
    fn alert_event_type_field_is_renamed_from_kind() {
        let event = AlertEvent {
            channel_id: "PDX Tower".into(),
            kind: "MILITARY".into(),
            callsign: Some("RCH123".into()),
            details: "military callsign".into(),
            severity: Severity::High,
            confidence: 0.95,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "MILITARY");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn batcher_caps_pending_queue_at_soft_cap() {
        let bus = EventBus::new();
        let mut batcher = TransmissionBatcher::new("PDX Tower", bus);
        batcher.soft_cap = 5;
        for i in 0..10 {
            batcher.push(tx(i));
        }
        assert_eq!(batcher.pending_len(), 5);
        assert_eq!(batcher.pending[0].id, 5);
    }

    #[test]
    fn flush_emits_at_most_max_batch_transmissions() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let mut batcher = TransmissionBatcher::new("PDX Tower", bus);
        batcher.max_batch = 3;
        for i in 0..7 {
            batcher.push(tx(i));
        }
        batcher.flush();
        let event = rx.try_recv().expect("expected a flushed event");
        match event {
            MonitorEvent::AtcTransmission(e) => assert_eq!(e.transmissions.len(), 3),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(batcher.pending_len(), 4);
    }

    #[test]
    fn flush_with_nothing_pending_publishes_nothing() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let mut batcher = TransmissionBatcher::new("PDX Tower", bus);
        batcher.flush();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn spawned_batcher_flushes_pushed_transmissions_on_cancellation() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let token = CancellationToken::new();
        let (handle, pusher) = TransmissionBatcher::spawn("PDX Tower", bus, token.clone());

        pusher.push(tx(0));
        pusher.push(tx(1));
        token.cancel();
        handle.await.unwrap();

        let event = rx.try_recv().expect("expected a flushed event on cancellation");
        match event {
            MonitorEvent::AtcTransmission(e) => assert_eq!(e.transmissions.len(), 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
