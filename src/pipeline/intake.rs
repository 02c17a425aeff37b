//! Upload boundary: store an uploaded document and enqueue its job.

use super::job::SigningJob;
use super::queue::MemoryQueue;
use super::store::{DocumentStore, PDF_CONTENT_TYPE};
use crate::error::{Error, Result};

/// Store `bytes` under a fresh `<uuid>_<file name>` key and publish a
/// signing job for it. Returns the job.
///
/// Acknowledges as soon as the job is queued; the signing result shows up
/// later as `signed_<key>` in the store or as a failure record.
pub async fn submit(
    store: &dyn DocumentStore,
    queue: &MemoryQueue,
    file_name: &str,
    bytes: Vec<u8>,
    requested_by: &str,
) -> Result<SigningJob> {
    if bytes.is_empty() {
        return Err(Error::EmptyDocument);
    }
    if requested_by.trim().is_empty() {
        return Err(Error::Config("uploader identity is required".to_string()));
    }

    let key = document_key(file_name);
    store.put(&key, bytes, PDF_CONTENT_TYPE).await?;

    let job = SigningJob::new(key, requested_by);
    queue.publish(&job)?;
    log::info!("Queued {} for {}", job.document_key, job.requested_by);
    Ok(job)
}

/// Fresh collision-free key for an upload.
pub fn document_key(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("document.pdf");
    format!("{}_{}", uuid::Uuid::new_v4(), base)
}
