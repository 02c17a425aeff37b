//! Per-job sequencing of download, stamp, sign and upload.

use super::job::{FailureRecord, JobOutcome, JobState, SigningJob};
use super::queue::{Delivery, JobQueue};
use super::sink::FailureSink;
use super::store::{DocumentStore, PDF_CONTENT_TYPE};
use crate::config::SealerConfig;
use crate::error::{Error, Result};
use crate::signatures::{sign, IdentitySource, SignatureEmbedder};
use crate::stamp::VisualStamper;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How long a worker waits on an empty queue before checking for shutdown.
const RECEIVE_POLL: Duration = Duration::from_millis(250);

/// Jobs settled by [`SigningOrchestrator::run`] or
/// [`SigningOrchestrator::run_until_idle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Jobs that reached `DONE`
    pub done: u64,
    /// Jobs that reached `FAILED`
    pub failed: u64,
}

impl RunSummary {
    fn merge(&mut self, other: RunSummary) {
        self.done += other.done;
        self.failed += other.failed;
    }
}

/// Drives jobs through the signing state machine.
///
/// Every failure is caught, turned into a [`FailureRecord`] and reported to
/// the sink; the job is then nacked, never acked.
pub struct SigningOrchestrator {
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn FailureSink>,
    identities: IdentitySource,
    stamper: VisualStamper,
    embedder: SignatureEmbedder,
    config: SealerConfig,
}

impl SigningOrchestrator {
    /// Build an orchestrator from configuration. Loads the configured signer
    /// identity once, or falls back to per-job issuance.
    pub fn from_config(
        config: SealerConfig,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn FailureSink>,
    ) -> Result<Self> {
        config.validate()?;
        let identities = config.identity_source()?;
        Ok(Self::new(config, store, sink, identities))
    }

    /// Build an orchestrator with an explicit identity source.
    pub fn new(
        config: SealerConfig,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn FailureSink>,
        identities: IdentitySource,
    ) -> Self {
        Self {
            stamper: VisualStamper::new(config.stamp.clone()),
            embedder: SignatureEmbedder::new(config.signing.clone()),
            store,
            sink,
            identities,
            config,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SealerConfig {
        &self.config
    }

    /// Process one job to a terminal state.
    ///
    /// Does not touch the queue or the sink; see [`Self::settle`].
    pub async fn process(&self, job: &SigningJob) -> JobOutcome {
        let mut state = JobState::Received;
        log::debug!("Job {} {}", job.document_key, state);

        match self.run_stages(job, &mut state).await {
            Ok((signed_key, digest)) => {
                advance(job, &mut state);
                log::info!("Signed {} for {} as {}", job.document_key, job.requested_by, signed_key);
                JobOutcome::Done { signed_key, digest }
            },
            Err(e) => {
                log::debug!("Job {} {} -> FAILED", job.document_key, state);
                JobOutcome::Failed(FailureRecord::new(job, state, &e))
            },
        }
    }

    async fn run_stages(&self, job: &SigningJob, state: &mut JobState) -> Result<(String, Vec<u8>)> {
        let key = job.document_key.as_str();
        let signer = job.requested_by.clone();
        let now = Utc::now();

        let original = self.with_timeout(key, self.store.get(key)).await?;
        advance(job, state);

        let stamper = self.stamper.clone();
        let name = signer.clone();
        let stamped = blocking(move || stamper.stamp(&original, &name, &now)).await?;
        advance(job, state);

        if self.config.store_stamped {
            let stamped_key = self.config.stamped_key(key);
            self.with_timeout(
                &stamped_key,
                self.store.put(&stamped_key, stamped.clone(), PDF_CONTENT_TYPE),
            )
            .await?;
        }

        let identities = self.identities.clone();
        let requester = signer.clone();
        let identity = blocking(move || identities.identity_for(&requester)).await?;
        advance(job, state);

        let embedder = self.embedder.clone();
        let name = signer.clone();
        let reason = self.config.signing.reason.clone();
        let prepared = blocking(move || embedder.prepare(&stamped, &name, &reason, now)).await?;
        let digest = prepared.digest().to_vec();
        advance(job, state);

        let signed = blocking(move || {
            let envelope = sign(prepared.digest(), &identity)?;
            prepared.finish(&envelope.signature_bytes)
        })
        .await?;
        advance(job, state);

        let signed_key = self.config.signed_key(key);
        self.with_timeout(&signed_key, self.store.put(&signed_key, signed, PDF_CONTENT_TYPE))
            .await?;
        advance(job, state);

        Ok((signed_key, digest))
    }

    /// Process a delivery, then ack it on success or report and nack it on
    /// failure. Retryable failures are requeued.
    pub async fn settle(&self, queue: &dyn JobQueue, delivery: Delivery) -> Result<JobOutcome> {
        if delivery.attempt > 1 {
            log::info!(
                "Redelivery {} of {}",
                delivery.attempt,
                delivery.job.document_key
            );
        }
        let outcome = self.process(&delivery.job).await;
        match &outcome {
            JobOutcome::Done { .. } => queue.ack(delivery.delivery_tag).await?,
            JobOutcome::Failed(record) => {
                self.sink.report(record);
                queue.nack(delivery.delivery_tag, record.retryable).await?;
            },
        }
        Ok(outcome)
    }

    /// Settle jobs on the calling task until the queue has nothing to hand
    /// out.
    pub async fn run_until_idle(&self, queue: &dyn JobQueue) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        while let Some(delivery) = queue.receive(Duration::ZERO).await? {
            count(&mut summary, &self.settle(queue, delivery).await?);
        }
        Ok(summary)
    }

    /// Run `config.workers` concurrent workers until `shutdown` turns true
    /// or its sender is dropped. A job in progress is finished first.
    pub async fn run(
        self: Arc<Self>,
        queue: Arc<dyn JobQueue>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary> {
        let workers = self.config.workers.max(1);
        log::info!("Starting {} signing workers", workers);

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let orchestrator = Arc::clone(&self);
                let queue = Arc::clone(&queue);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { orchestrator.worker(id, queue, shutdown).await })
            })
            .collect();

        let mut summary = RunSummary::default();
        for handle in handles {
            let worker = handle
                .await
                .map_err(|e| Error::Queue(format!("worker task failed: {}", e)))?;
            summary.merge(worker);
        }
        log::info!("Workers stopped: {} done, {} failed", summary.done, summary.failed);
        Ok(summary)
    }

    async fn worker(
        &self,
        id: usize,
        queue: Arc<dyn JobQueue>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = queue.receive(RECEIVE_POLL) => received,
            };
            match received {
                Ok(Some(delivery)) => match self.settle(queue.as_ref(), delivery).await {
                    Ok(outcome) => count(&mut summary, &outcome),
                    Err(e) => log::error!("Worker {} could not settle a job: {}", id, e),
                },
                Ok(None) => {},
                Err(e) => {
                    log::error!("Worker {} failed to receive: {}", id, e);
                    tokio::time::sleep(RECEIVE_POLL).await;
                },
            }
        }
        log::debug!("Worker {} stopping", id);
        summary
    }

    async fn with_timeout<T>(&self, key: &str, op: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.store_timeout();
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => Err(Error::StoreTimeout {
                key: key.to_string(),
                seconds: limit.as_secs(),
            }),
        }
    }
}

fn advance(job: &SigningJob, state: &mut JobState) {
    if let Some(next) = state.next() {
        log::debug!("Job {} {} -> {}", job.document_key, state, next);
        *state = next;
    }
}

fn count(summary: &mut RunSummary, outcome: &JobOutcome) {
    if outcome.is_done() {
        summary.done += 1;
    } else {
        summary.failed += 1;
    }
}

/// Run CPU-bound work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Signing(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::queue::MemoryQueue;
    use crate::pipeline::sink::MemorySink;
    use crate::pipeline::store::MemoryStore;
    use crate::signatures::SignerIdentity;
    use crate::object::{Object, ObjectRef};
    use crate::writer::PdfWriter;
    use async_trait::async_trait;
    use std::sync::OnceLock;

    fn identity() -> Arc<SignerIdentity> {
        static IDENTITY: OnceLock<Arc<SignerIdentity>> = OnceLock::new();
        IDENTITY
            .get_or_init(|| Arc::new(crate::signatures::IdentityIssuer::new().issue("Test Signer").unwrap()))
            .clone()
    }

    fn one_page_pdf() -> Vec<u8> {
        let mut writer = PdfWriter::new((1, 4));
        for (id, source) in [
            (1, "<< /Type /Catalog /Pages 2 0 R >>"),
            (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 612 792] >>"),
            (3, "<< /Type /Page /Parent 2 0 R >>"),
        ] {
            let (_, object) = crate::parser::parse_object(source.as_bytes()).unwrap();
            writer.set_object(ObjectRef::new(id, 0), object);
        }
        writer.set_trailer_entry("Root", Object::Reference(ObjectRef::new(1, 0)));
        writer.finish()
    }

    fn orchestrator(store: Arc<dyn DocumentStore>, sink: Arc<MemorySink>) -> SigningOrchestrator {
        SigningOrchestrator::new(
            SealerConfig::new(),
            store,
            sink,
            IdentitySource::Static(identity()),
        )
    }

    #[tokio::test]
    async fn test_process_stores_signed_artifact() {
        let store = Arc::new(MemoryStore::new());
        store.put("doc-1", one_page_pdf(), PDF_CONTENT_TYPE).await.unwrap();
        let orch = orchestrator(store.clone(), Arc::new(MemorySink::new()));

        let outcome = orch.process(&SigningJob::new("doc-1", "alice")).await;
        match outcome {
            JobOutcome::Done { signed_key, digest } => {
                assert_eq!(signed_key, "signed_doc-1");
                assert_eq!(digest.len(), 32);
            },
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(store.exists("signed_doc-1").await.unwrap());
        assert!(!store.exists("stamped_doc-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_document_fails_at_received() {
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(store, Arc::new(MemorySink::new()));
        let outcome = orch.process(&SigningJob::new("ghost", "alice")).await;
        let JobOutcome::Failed(record) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(record.stage, JobState::Received);
        assert_eq!(record.kind, crate::error::ErrorKind::StoreIo);
        assert!(!record.retryable);
    }

    struct SlowStore;

    #[async_trait]
    impl DocumentStore for SlowStore {
        async fn get(&self, _key: &str) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn put(&self, _key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<()> {
            Ok(())
        }

        async fn exists(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_is_retryable() {
        let orch = orchestrator(Arc::new(SlowStore), Arc::new(MemorySink::new()));
        let JobOutcome::Failed(record) = orch.process(&SigningJob::new("slow", "alice")).await else {
            panic!("expected failure");
        };
        assert!(record.retryable);
        assert!(record.message.contains("timed out after 30s"));
    }

    #[tokio::test]
    async fn test_settle_failure_reports_and_nacks() {
        let store = Arc::new(MemoryStore::new());
        store.put("bad", b"not a pdf".to_vec(), PDF_CONTENT_TYPE).await.unwrap();
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(store, sink.clone());
        let queue = MemoryQueue::new(3);
        queue.publish(&SigningJob::new("bad", "alice")).unwrap();

        let summary = orch.run_until_idle(&queue).await.unwrap();
        assert_eq!(summary, RunSummary { done: 0, failed: 1 });
        assert_eq!(queue.acked(), 0);
        assert_eq!(queue.dead_letters().len(), 1);
        let records = sink.records();
        assert_eq!(records[0].stage, JobState::Downloaded);
        assert_eq!(records[0].kind, crate::error::ErrorKind::UnsupportedDocument);
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl DocumentStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> Result<Vec<u8>> {
            Ok(one_page_pdf())
        }

        async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<()> {
            Err(Error::StoreIo {
                key: key.to_string(),
                reason: "read-only".to_string(),
            })
        }

        async fn exists(&self, _key: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_upload_failure_reports_last_completed_stage() {
        let orch = orchestrator(Arc::new(ReadOnlyStore), Arc::new(MemorySink::new()));
        let JobOutcome::Failed(record) = orch.process(&SigningJob::new("doc-1", "alice")).await else {
            panic!("expected failure");
        };
        assert_eq!(record.stage, JobState::SignatureEmbedded);
        assert_eq!(record.stage.next(), Some(JobState::Uploaded));
        assert!(record.retryable);
    }
}
