//! Bounded worker pool multiplexing `N` channel segment streams onto `K`
//! transcription workers, each owning one loaded model instance.
//!
//! Grounded in `original_source/core/multi_channel_monitor.py`'s
//! `TranscriptionWorkerPool`: `queue.Queue` + `threading.Thread` becomes a
//! `crossbeam_channel::bounded` job queue consumed by
//! `tokio::task::spawn_blocking` workers — the model call is synchronous
//! CPU/accelerator work, the same justification `dictum-core`'s pipeline
//! gives for running inference inside `spawn_blocking`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::model::TranscriptionModel;
use crate::error::{AtcError, Result};

/// One transcription job: a finalized segment plus the context needed to
/// attribute the result once transcribed.
pub struct Job {
    pub path: PathBuf,
    pub channel_id: String,
    pub frequency: String,
    pub recorded_timestamp: DateTime<Utc>,
}

/// Outcome of one job, always delivered exactly once (§4.2, concurrency).
pub enum JobResult {
    /// Model returned non-empty text.
    Success {
        text: String,
        segments: Vec<crate::models::TranscriptSegment>,
        processing_time: Duration,
    },
    /// Model ran successfully but returned no speech.
    EmptyText { processing_time: Duration },
    /// Model call failed; the worker stays alive.
    Error { message: String },
}

pub struct CompletedJob {
    pub job: Job,
    pub worker_id: usize,
    pub result: JobResult,
}

type JobCallback = Box<dyn FnOnce(CompletedJob) + Send>;

/// Status of one worker, for `worker_status` events.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerStatus {
    Idle,
    Busy { channel_id: String },
}

pub type StatusHook = Arc<dyn Fn(usize, WorkerStatus) + Send + Sync>;

/// A running pool of `K` transcription workers.
pub struct TranscriptionPool {
    sender: Option<Sender<(Job, JobCallback)>>,
    handles: Vec<JoinHandle<()>>,
}

impl TranscriptionPool {
    /// Load `num_workers` models (one per worker, built via `model_factory`)
    /// and start their worker loops. Returns once every worker is ready, or
    /// a fatal error if any model failed to load — matching §4.2's `Start`
    /// contract.
    pub async fn start<M, F>(
        num_workers: usize,
        queue_capacity: usize,
        model_factory: F,
        on_status: StatusHook,
    ) -> Result<Self>
    where
        M: TranscriptionModel,
        F: Fn() -> M + Send + Sync + Clone + 'static,
    {
        let (tx, rx) = bounded::<(Job, JobCallback)>(queue_capacity.max(1));

        let mut ready_rxs = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), String>>();
            let rx = rx.clone();
            let factory = model_factory.clone();
            let status = Arc::clone(&on_status);

            let handle = tokio::task::spawn_blocking(move || {
                let mut model = factory();
                if let Err(e) = model.warm_up() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                worker_loop(worker_id, model, rx, status);
            });

            ready_rxs.push(ready_rx);
            handles.push(handle);
        }

        for (worker_id, ready_rx) in ready_rxs.into_iter().enumerate() {
            match ready_rx.await {
                Ok(Ok(())) => {
                    info!(worker_id, "transcription worker ready");
                }
                Ok(Err(message)) => {
                    error!(worker_id, %message, "transcription worker failed to load model");
                    drop(tx);
                    for handle in handles {
                        handle.abort();
                    }
                    return Err(AtcError::Transcription(format!(
                        "worker {worker_id} failed to load model: {message}"
                    )));
                }
                Err(_) => {
                    return Err(AtcError::Transcription(format!(
                        "worker {worker_id} died before reporting readiness"
                    )));
                }
            }
        }

        info!(num_workers, "transcription pool started");
        Ok(Self {
            sender: Some(tx),
            handles,
        })
    }

    /// Enqueue a job. Blocks the caller if the queue is at capacity
    /// (backpressure, per §4.2).
    pub fn submit(
        &self,
        job: Job,
        on_complete: impl FnOnce(CompletedJob) + Send + 'static,
    ) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or(AtcError::PoolNotRunning)?;
        sender
            .send((job, Box::new(on_complete)))
            .map_err(|_| AtcError::PoolNotRunning)
    }

    /// Close the job queue and wait for all workers to drain and exit.
    pub async fn stop(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("transcription worker did not exit within timeout");
            }
        }
        info!("transcription pool stopped");
    }
}

fn worker_loop<M: TranscriptionModel>(
    worker_id: usize,
    mut model: M,
    rx: Receiver<(Job, JobCallback)>,
    on_status: StatusHook,
) {
    on_status(worker_id, WorkerStatus::Idle);

    while let Ok((job, callback)) = rx.recv() {
        on_status(
            worker_id,
            WorkerStatus::Busy {
                channel_id: job.channel_id.clone(),
            },
        );

        let start = Instant::now();
        let result = match model.transcribe(&job.path) {
            Ok(output) if !output.text.trim().is_empty() => JobResult::Success {
                text: output.text,
                segments: output.segments,
                processing_time: start.elapsed(),
            },
            Ok(_) => JobResult::EmptyText {
                processing_time: start.elapsed(),
            },
            Err(e) => {
                error!(worker_id, channel = %job.channel_id, error = %e, "transcription failed");
                JobResult::Error {
                    message: e.to_string(),
                }
            }
        };

        callback(CompletedJob {
            job,
            worker_id,
            result,
        });

        on_status(worker_id, WorkerStatus::Idle);
    }
}
