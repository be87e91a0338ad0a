//! Coordinator (§4.5): owns channel/correlator/surveillance lifecycle, wires
//! recorded segments to the transcription pool, transcripts to the
//! correlator, and every side effect onto the event bus.
//!
//! Grounded in `dictum_core::engine::DictumEngine`'s lifecycle shape
//! (`new`/`start`/`stop`, an `AtomicBool` running flag, a `CancellationToken`
//! handed to every spawned task) generalized from "one engine, one audio
//! device" to "one monitor, N channels + one poller + one correlator + K
//! transcription workers", and in
//! `original_source/core/multi_channel_monitor.py`'s
//! `MultiChannelATCMonitor` for the per-channel ring buffer, the
//! transcription callback sequencing, the 1Hz stats sampler, and the final
//! statistics printed on shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use atc_core::audio::{RecorderConfig, RecordedSegment, SegmentRecorder};
use atc_core::config::{ChannelConfig, MonitorConfig, SurveillanceSource};
use atc_core::correlator::{
    ContactSummary, CorrelatorClient, CorrelatorOutcome, PromptBudget, TransmissionSummary,
};
use atc_core::error::{AtcError, Result};
use atc_core::events::{
    AlertEvent, BatcherHandle, ChannelRecordingEvent, ChannelStats as EventChannelStats,
    ChannelsInitializedEvent, EventBus, MonitorEvent, StatsUpdateEvent, TransmissionBatcher,
    UpdateAircraftEvent, WorkerStatusEvent,
};
use atc_core::models::Transmission;
use atc_core::surveillance::{
    AdsbExchangeSource, ContactSet, LocalAdsbSource, OpenSkySource, SurveillancePoller,
    SurveillanceProvider,
};
use atc_core::transcription::{CompletedJob, Job, JobResult, TranscriptionPool};
use atc_core::vad::energy::EnergyVad;

use crate::channel::ChannelState;
use crate::stub_model::StubTranscriptionModel;

/// Hostname:port a `dump1090`/`dump978`-style local source listens on when
/// no other address is configured (§4.3 names no recognized config field
/// for this, so it is fixed the way the original's CLI default is).
const DEFAULT_LOCAL_ADSB_URL: &str = "http://localhost:8080";

/// Shutdown budget for draining every spawned task, per §5/§8 invariant 7.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct OpenSkyCredentials {
    client_id: String,
    client_secret: String,
}

fn load_opensky_credentials(path: &str) -> Option<(String, String)> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path, error = %e, "failed to read OpenSky credentials file, continuing anonymously");
            return None;
        }
    };
    match serde_json::from_str::<OpenSkyCredentials>(&contents) {
        Ok(creds) => Some((creds.client_id, creds.client_secret)),
        Err(e) => {
            warn!(path, error = %e, "failed to parse OpenSky credentials file, continuing anonymously");
            None
        }
    }
}

fn build_provider(config: &MonitorConfig, client: &Client) -> (Arc<dyn SurveillanceProvider>, Duration) {
    match config.adsb_source {
        SurveillanceSource::OpenSky => {
            let creds = config
                .opensky_credentials_file
                .as_deref()
                .and_then(load_opensky_credentials);
            let rate_limit = if creds.is_some() {
                Duration::from_secs(5)
            } else {
                Duration::from_secs(10)
            };
            let (client_id, client_secret) = match creds {
                Some((id, secret)) => (Some(id), Some(secret)),
                None => (None, None),
            };
            (
                Arc::new(OpenSkySource::new(client.clone(), client_id, client_secret)),
                rate_limit,
            )
        }
        SurveillanceSource::AdsbExchange => (
            Arc::new(AdsbExchangeSource::new(client.clone(), None)),
            Duration::from_secs(10),
        ),
        SurveillanceSource::Local => (
            Arc::new(LocalAdsbSource::new(client.clone(), DEFAULT_LOCAL_ADSB_URL)),
            Duration::from_secs(10),
        ),
    }
}

fn sanitize_path_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

/// State shared across every task the monitor spawns. Kept separate from
/// [`Monitor`] itself so task closures can hold an `Arc<Shared>` without
/// dragging along the join handles / running flag.
struct Shared {
    config: MonitorConfig,
    channels: Mutex<HashMap<String, ChannelState>>,
    contacts: Arc<ContactSet>,
    event_bus: EventBus,
    tx_id: AtomicU64,
    correlator: Option<Arc<CorrelatorClient>>,
    pool: Mutex<Option<TranscriptionPool>>,
    batchers: Mutex<HashMap<String, BatcherHandle>>,
    audio_dir: PathBuf,
    transcript_dir: PathBuf,
}

/// Owns the whole monitor run: channel recorders, the transcription pool,
/// the surveillance poller, the correlator, and the event bus they all
/// publish to.
pub struct Monitor {
    shared: Arc<Shared>,
    running: AtomicBool,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, audio_dir: PathBuf, transcript_dir: PathBuf) -> Self {
        let correlator = if config.enable_llm_correlation {
            Some(Arc::new(CorrelatorClient::new(
                Client::new(),
                config.ollama_base_url.clone(),
                config.ollama_model.clone(),
                PromptBudget::default(),
                config.request_timeout(),
            )))
        } else {
            None
        };

        Self {
            shared: Arc::new(Shared {
                config,
                channels: Mutex::new(HashMap::new()),
                contacts: Arc::new(ContactSet::new()),
                event_bus: EventBus::new(),
                tx_id: AtomicU64::new(0),
                correlator,
                pool: Mutex::new(None),
                batchers: Mutex::new(HashMap::new()),
                audio_dir,
                transcript_dir,
            }),
            running: AtomicBool::new(false),
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to every event this monitor publishes.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MonitorEvent> {
        self.shared.event_bus.subscribe()
    }

    /// Start every channel recorder, the transcription pool, the
    /// surveillance poller (if enabled), and the stats sampler. Returns once
    /// every transcription worker has loaded its model, or a fatal error if
    /// any failed to (§4.2/§4.5 `Start` contract).
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AtcError::AlreadyRunning);
        }

        std::fs::create_dir_all(&self.shared.audio_dir)?;
        std::fs::create_dir_all(&self.shared.transcript_dir)?;

        info!(
            num_channels = self.shared.config.channels_config.len(),
            "starting monitor"
        );

        let channel_ids: Vec<String> = {
            let mut channels = self.shared.channels.lock();
            let history_len = self.shared.config.channel_history_len();
            for cfg in &self.shared.config.channels_config {
                channels.insert(cfg.name.clone(), ChannelState::new(cfg.clone(), history_len));
            }
            channels.keys().cloned().collect()
        };

        let mut batcher_tasks = Vec::new();
        {
            let mut batchers = self.shared.batchers.lock();
            for channel_id in &channel_ids {
                let (handle, pusher) = TransmissionBatcher::spawn(
                    channel_id.clone(),
                    self.shared.event_bus.clone(),
                    self.token.child_token(),
                );
                batcher_tasks.push(handle);
                batchers.insert(channel_id.clone(), pusher);
            }
        }

        let event_bus_for_status = self.shared.event_bus.clone();
        let pool = TranscriptionPool::start(
            self.shared.config.num_transcription_workers,
            self.shared.config.num_transcription_workers * 4,
            || StubTranscriptionModel::default(),
            Arc::new(move |worker_id, status| {
                event_bus_for_status.publish(MonitorEvent::WorkerStatus(WorkerStatusEvent {
                    worker_id,
                    status,
                }));
            }),
        )
        .await?;
        *self.shared.pool.lock() = Some(pool);

        let mut tasks = batcher_tasks;
        for cfg in self.shared.config.channels_config.clone() {
            tasks.push(self.spawn_recorder(cfg));
        }

        if self.shared.config.enable_adsb {
            tasks.push(self.spawn_poller());
        }

        tasks.push(self.spawn_stats_sampler());

        *self.tasks.lock() = tasks;

        self.shared
            .event_bus
            .publish(MonitorEvent::ChannelsInitialized(ChannelsInitializedEvent {
                channel_ids,
            }));

        Ok(())
    }

    fn spawn_recorder(&self, cfg: ChannelConfig) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let token = self.token.child_token();
        let channel_id = cfg.name.clone();

        let recorder_config = RecorderConfig {
            stream_url: cfg.stream_url.clone(),
            decoder_command: shared.config.decoder_command.clone(),
            sample_rate: shared.config.sample_rate,
            channels: shared.config.channels,
            vad_threshold: shared.config.vad_threshold,
            silence_duration_secs: shared.config.silence_duration_secs,
            min_transmission_length_secs: shared.config.min_transmission_length_secs,
            output_dir: shared.audio_dir.join(sanitize_path_component(&cfg.name)),
        };
        let vad = EnergyVad::new(shared.config.vad_threshold);
        let recorder = SegmentRecorder::new(cfg.name.clone(), cfg.frequency.clone(), recorder_config, vad);

        tokio::spawn(async move {
            let on_segment_shared = Arc::clone(&shared);
            let result = recorder
                .run(token, move |segment| on_segment(Arc::clone(&on_segment_shared), segment))
                .await;
            if let Err(e) = result {
                error!(channel = %channel_id, error = %e, "segment recorder ended with an error");
            }
        })
    }

    fn spawn_poller(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let token = self.token.child_token();
        let client = Client::new();

        let (provider, rate_limit) = build_provider(&shared.config, &client);
        let poller = SurveillancePoller::new(
            provider,
            Arc::clone(&shared.contacts),
            shared.config.airport_lat,
            shared.config.airport_lon,
            shared.config.search_radius_nm,
            rate_limit,
        );

        tokio::spawn(async move {
            poller
                .run(token, move |contact| {
                    shared.event_bus.publish(MonitorEvent::UpdateAircraft(UpdateAircraftEvent {
                        contacts: vec![contact.clone()],
                    }));
                })
                .await;
        })
    }

    fn spawn_stats_sampler(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let token = self.token.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        publish_stats(&shared);
                    }
                }
            }
        })
    }

    /// Cancel every spawned task, drain the transcription pool, wait up to
    /// the shutdown budget for everything to exit, and print final
    /// statistics (§5, §8 invariant 7).
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("shutting down monitor");
        self.token.cancel();

        let maybe_pool = self.shared.pool.lock().take();
        if let Some(mut pool) = maybe_pool {
            pool.stop().await;
        }

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;
        if joined.is_err() {
            warn!("not every monitor task exited within the shutdown window");
        }

        self.print_final_statistics();
    }

    fn print_final_statistics(&self) {
        let channels = self.shared.channels.lock();
        info!("=== final monitor statistics ===");
        for (name, ch) in channels.iter() {
            info!(
                channel = name,
                recorded = ch.stats.recorded_count,
                transcribed = ch.stats.transcribed_count,
                alerts = ch.stats.alert_count,
                "channel statistics"
            );
        }
        if let Some(correlator) = &self.shared.correlator {
            let stats = correlator.stats_snapshot();
            info!(
                api_calls = stats.api_calls,
                total_tokens = stats.total_tokens,
                errors = stats.errors,
                avg_response_secs = stats.average_response_time_secs(),
                "correlator statistics"
            );
        }
    }
}

fn publish_stats(shared: &Arc<Shared>) {
    let channel_stats: Vec<EventChannelStats> = {
        let channels = shared.channels.lock();
        channels
            .values()
            .map(|ch| EventChannelStats {
                channel_id: ch.config.name.clone(),
                transmission_count: ch.stats.transcribed_count,
                non_transponder_alerts: ch.stats.alert_count,
            })
            .collect()
    };

    let (api_calls, total_tokens, errors, avg_secs) = shared
        .correlator
        .as_ref()
        .map(|c| {
            let stats = c.stats_snapshot();
            (stats.api_calls, stats.total_tokens, stats.errors, stats.average_response_time_secs())
        })
        .unwrap_or((0, 0, 0, 0.0));

    shared.event_bus.publish(MonitorEvent::StatsUpdate(StatsUpdateEvent {
        channel_stats,
        correlator_api_calls: api_calls,
        correlator_total_tokens: total_tokens,
        correlator_errors: errors,
        correlator_avg_response_secs: avg_secs,
    }));
}

/// Runs on the recorder's task the moment a segment is finalized: bump the
/// recorded counter, publish `channel_recording`, and submit the segment to
/// the transcription pool.
fn on_segment(shared: Arc<Shared>, segment: RecordedSegment) {
    let channel_id = segment.channel_id.clone();

    let frequency = {
        let mut channels = shared.channels.lock();
        match channels.get_mut(&channel_id) {
            Some(ch) => {
                ch.stats.recorded_count += 1;
                ch.config.frequency.clone()
            }
            None => {
                warn!(channel = %channel_id, "segment finalized for an unknown channel");
                return;
            }
        }
    };

    shared.event_bus.publish(MonitorEvent::ChannelRecording(ChannelRecordingEvent {
        channel_id: channel_id.clone(),
        path: segment.path.display().to_string(),
    }));

    let job = Job {
        path: segment.path,
        channel_id: channel_id.clone(),
        frequency,
        recorded_timestamp: segment.recorded_timestamp,
    };

    let submit_result = {
        let pool_guard = shared.pool.lock();
        match pool_guard.as_ref() {
            Some(pool) => {
                let callback_shared = Arc::clone(&shared);
                pool.submit(job, move |completed| on_transcribed(callback_shared, completed))
            }
            None => Err(AtcError::PoolNotRunning),
        }
    };

    if let Err(e) = submit_result {
        error!(channel = %channel_id, error = %e, "failed to submit transcription job");
    }
}

/// Runs on a transcription worker's blocking thread the moment a job
/// completes (§4.5, "Transcription callback behavior"): save the artifact,
/// publish the transmission, append to the channel's ring buffer, and kick
/// off correlation against the live contact set.
fn on_transcribed(shared: Arc<Shared>, completed: CompletedJob) {
    let channel_id = completed.job.channel_id.clone();

    let (text, segments) = match completed.result {
        JobResult::Success { text, segments, .. } => (text, segments),
        JobResult::EmptyText { .. } => return,
        JobResult::Error { message } => {
            error!(channel = %channel_id, error = %message, "transcription job failed");
            return;
        }
    };

    let transcription_timestamp = Utc::now();
    let audio_duration_secs = Transmission::audio_duration_from_segments(&segments);
    let transcription_delay_secs = (transcription_timestamp - completed.job.recorded_timestamp)
        .num_milliseconds() as f64
        / 1000.0;

    let transmission = Transmission {
        id: shared.tx_id.fetch_add(1, Ordering::SeqCst),
        channel_id: channel_id.clone(),
        frequency: completed.job.frequency.clone(),
        timestamp: transcription_timestamp,
        segments,
        text,
        audio_duration_secs,
        transcription_delay_secs: transcription_delay_secs.max(0.0),
    };

    save_transcript(&shared, &transmission);

    match shared.batchers.lock().get(&channel_id) {
        Some(pusher) => pusher.push(transmission.clone()),
        None => warn!(channel = %channel_id, "no transmission batcher for channel, dropping UI event"),
    }

    let recent = {
        let mut channels = shared.channels.lock();
        let Some(ch) = channels.get_mut(&channel_id) else {
            return;
        };
        ch.push_transmission(transmission);
        ch.stats.transcribed_count += 1;
        ch.stats.last_transmission = Some(transcription_timestamp);
        let window = shared.config.llm_max_transmissions.max(1);
        ch.recent(window)
    };

    let Some(correlator) = shared.correlator.clone() else {
        return;
    };

    let contacts_snapshot = shared.contacts.snapshot();
    let now = Utc::now();
    let contacts: Vec<ContactSummary> = contacts_snapshot
        .values()
        .take(shared.config.llm_max_adsb_contacts)
        .map(|c| ContactSummary {
            icao: c.icao24.clone(),
            callsign: c.callsign.clone(),
            altitude_ft: c.altitude_ft,
            heading_deg: c.track_deg,
            speed_kt: c.ground_speed_kt,
            squawk: c.squawk.clone(),
            age_secs: (now - c.timestamp).num_seconds().max(0),
        })
        .collect();

    let transmissions: Vec<TransmissionSummary> = recent
        .iter()
        .map(|t| TransmissionSummary {
            channel_name: t.channel_id.clone(),
            text: t.text.clone(),
            age_secs: (now - t.timestamp).num_seconds().max(0),
        })
        .collect();

    let batch_len = transmissions.len();
    tokio::spawn(async move {
        let outcome = correlator.correlate(&contacts, &transmissions).await;
        handle_correlator_outcome(&shared, &channel_id, batch_len, outcome);
    });
}

fn handle_correlator_outcome(shared: &Arc<Shared>, channel_id: &str, batch_len: usize, outcome: CorrelatorOutcome) {
    let result = match outcome {
        CorrelatorOutcome::Ok(result) => result,
        CorrelatorOutcome::Error { message, .. } => {
            warn!(channel = channel_id, error = %message, "correlator call failed");
            return;
        }
    };

    for correlation in &result.correlations {
        if correlation.transmission_id < 0 || correlation.transmission_id as usize >= batch_len {
            warn!(
                channel = channel_id,
                transmission_id = correlation.transmission_id,
                batch_len,
                "correlator returned an out-of-range transmission id, skipping"
            );
            continue;
        }
        info!(
            channel = channel_id,
            transmission_id = correlation.transmission_id,
            extracted = %correlation.extracted_identifier,
            matched_icao = %correlation.matched_icao,
            confidence = correlation.match_confidence,
            reasoning = %correlation.reasoning,
            "correlation decision"
        );
    }

    for alert in &result.alerts {
        shared.event_bus.publish(MonitorEvent::Alert(AlertEvent::from_correlator_alert(channel_id, alert)));
        if alert.kind == "NON_TRANSPONDER" {
            let mut channels = shared.channels.lock();
            if let Some(ch) = channels.get_mut(channel_id) {
                ch.stats.alert_count += 1;
            }
        }
    }
}

fn save_transcript(shared: &Arc<Shared>, transmission: &Transmission) {
    let dir = shared.transcript_dir.join(sanitize_path_component(&transmission.channel_id));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        error!(error = %e, "failed to create transcript directory");
        return;
    }

    let path = dir.join(format!("transmission_{}.json", transmission.id));
    match serde_json::to_vec_pretty(transmission) {
        Ok(bytes) => {
            if let Err(e) = std::fs::write(&path, bytes) {
                error!(path = %path.display(), error = %e, "failed to write transcript artifact");
            }
        }
        Err(e) => error!(error = %e, "failed to serialize transcript"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_path_component_replaces_unsafe_characters() {
        assert_eq!(sanitize_path_component("PDX Tower/1"), "PDX_Tower_1");
    }

    #[tokio::test]
    async fn starting_twice_returns_already_running() {
        let audio_dir = tempfile::tempdir().unwrap();
        let transcript_dir = tempfile::tempdir().unwrap();
        let monitor = Monitor::new(
            MonitorConfig {
                channels_config: Vec::new(),
                enable_adsb: false,
                enable_llm_correlation: false,
                num_transcription_workers: 1,
                ..MonitorConfig::default()
            },
            audio_dir.path().to_path_buf(),
            transcript_dir.path().to_path_buf(),
        );
        monitor.start().await.unwrap();
        let second = monitor.start().await;
        assert!(matches!(second, Err(AtcError::AlreadyRunning)));
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_before_start_is_a_no_op() {
        let audio_dir = tempfile::tempdir().unwrap();
        let transcript_dir = tempfile::tempdir().unwrap();
        let monitor = Monitor::new(
            MonitorConfig::default(),
            audio_dir.path().to_path_buf(),
            transcript_dir.path().to_path_buf(),
        );
        monitor.shutdown().await;
    }
}
