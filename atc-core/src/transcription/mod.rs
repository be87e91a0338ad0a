//! Transcription worker pool (§4.2): multiplexes segment files from every
//! channel onto `K` workers, each owning its own speech-to-text model.

pub mod model;
pub mod pool;

pub use model::{TranscriptionModel, TranscriptionOutput};
pub use pool::{CompletedJob, Job, JobResult, StatusHook, TranscriptionPool, WorkerStatus};

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::Result;

    #[derive(Clone, Default)]
    struct EchoModel {
        warm_up_calls: Arc<Mutex<u32>>,
    }

    impl TranscriptionModel for EchoModel {
        fn warm_up(&mut self) -> Result<()> {
            *self.warm_up_calls.lock().unwrap() += 1;
            Ok(())
        }

        fn transcribe(&mut self, path: &Path) -> Result<TranscriptionOutput> {
            if path.to_string_lossy().contains("silent") {
                return Ok(TranscriptionOutput::default());
            }
            Ok(TranscriptionOutput {
                text: "roger tower".to_string(),
                segments: vec![crate::models::TranscriptSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "roger tower".to_string(),
                }],
            })
        }
    }

    struct FailingModel;

    impl TranscriptionModel for FailingModel {
        fn warm_up(&mut self) -> Result<()> {
            Err(crate::error::AtcError::Transcription("no weights".into()))
        }

        fn transcribe(&mut self, _path: &Path) -> Result<TranscriptionOutput> {
            unreachable!("warm_up should have failed first")
        }
    }

    #[tokio::test]
    async fn submits_job_and_receives_exactly_one_callback() {
        let pool = TranscriptionPool::start(
            2,
            8,
            || EchoModel::default(),
            Arc::new(|_, _| {}),
        )
        .await
        .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        pool.submit(
            Job {
                path: "transmission_x.wav".into(),
                channel_id: "ch0".into(),
                frequency: "118.7".into(),
                recorded_timestamp: chrono::Utc::now(),
            },
            move |completed| {
                let _ = tx.send(completed);
            },
        )
        .unwrap();

        let completed = rx.await.unwrap();
        match completed.result {
            JobResult::Success { text, .. } => assert_eq!(text, "roger tower"),
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn empty_text_result_is_reported_not_dropped() {
        let pool = TranscriptionPool::start(
            1,
            8,
            || EchoModel::default(),
            Arc::new(|_, _| {}),
        )
        .await
        .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        pool.submit(
            Job {
                path: "transmission_silent.wav".into(),
                channel_id: "ch0".into(),
                frequency: "118.7".into(),
                recorded_timestamp: chrono::Utc::now(),
            },
            move |completed| {
                let _ = tx.send(completed);
            },
        )
        .unwrap();

        let completed = rx.await.unwrap();
        assert!(matches!(completed.result, JobResult::EmptyText { .. }));
    }

    #[tokio::test]
    async fn fatal_model_load_failure_aborts_start() {
        let result = TranscriptionPool::start(1, 4, || FailingModel, Arc::new(|_, _| {})).await;
        assert!(result.is_err());
    }
}
