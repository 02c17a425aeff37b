//! Jobs, job states and outcomes.

use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One request to sign one stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningJob {
    /// Store key of the uploaded document
    pub document_key: String,
    /// Authenticated identity of the uploader
    pub requested_by: String,
}

impl SigningJob {
    /// Create a job.
    pub fn new(document_key: impl Into<String>, requested_by: impl Into<String>) -> Self {
        Self {
            document_key: document_key.into(),
            requested_by: requested_by.into(),
        }
    }

    /// Decode a queue message body.
    pub fn from_json(body: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::Queue(format!("malformed job message: {}", e)))
    }

    /// Encode as a queue message body.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Queue(e.to_string()))
    }
}

/// Progress of a job through the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Message taken from the queue
    Received,
    /// Original fetched from the store
    Downloaded,
    /// Overlay added to page 1
    Stamped,
    /// Signer identity loaded or issued
    IdentityIssued,
    /// Placeholder reserved and ByteRange digest computed
    DigestComputed,
    /// CMS container written into the placeholder
    SignatureEmbedded,
    /// Signed artifact stored
    Uploaded,
    /// Finished
    Done,
    /// Abandoned
    Failed,
}

impl JobState {
    /// Name as written in logs and failure records.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Received => "RECEIVED",
            JobState::Downloaded => "DOWNLOADED",
            JobState::Stamped => "STAMPED",
            JobState::IdentityIssued => "IDENTITY_ISSUED",
            JobState::DigestComputed => "DIGEST_COMPUTED",
            JobState::SignatureEmbedded => "SIGNATURE_EMBEDDED",
            JobState::Uploaded => "UPLOADED",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
        }
    }

    /// `DONE` and `FAILED` end a job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// State that follows this one on success.
    pub fn next(&self) -> Option<JobState> {
        match self {
            JobState::Received => Some(JobState::Downloaded),
            JobState::Downloaded => Some(JobState::Stamped),
            JobState::Stamped => Some(JobState::IdentityIssued),
            JobState::IdentityIssued => Some(JobState::DigestComputed),
            JobState::DigestComputed => Some(JobState::SignatureEmbedded),
            JobState::SignatureEmbedded => Some(JobState::Uploaded),
            JobState::Uploaded => Some(JobState::Done),
            JobState::Done | JobState::Failed => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured report of a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    /// Key of the job's source document
    pub document_key: String,
    /// Uploader of the document
    pub requested_by: String,
    /// Last state reached before the failing step
    pub stage: JobState,
    /// Error classification
    pub kind: ErrorKind,
    /// Error description
    pub message: String,
    /// Whether redelivery may succeed
    pub retryable: bool,
}

impl FailureRecord {
    /// Record `error` raised while leaving `stage`.
    pub fn new(job: &SigningJob, stage: JobState, error: &Error) -> Self {
        Self {
            document_key: job.document_key.clone(),
            requested_by: job.requested_by.clone(),
            stage,
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Terminal result of processing one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Signed artifact stored
    Done {
        /// Key of the signed artifact
        signed_key: String,
        /// SHA-256 digest that was signed
        digest: Vec<u8>,
    },
    /// Job abandoned
    Failed(FailureRecord),
}

impl JobOutcome {
    /// Terminal state of this outcome.
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Done { .. } => JobState::Done,
            JobOutcome::Failed(_) => JobState::Failed,
        }
    }

    /// Whether the job succeeded.
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_wire_format() {
        let job = SigningJob::new("doc-123", "alice");
        let json = String::from_utf8(job.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"documentKey":"doc-123","requestedBy":"alice"}"#);
        assert_eq!(SigningJob::from_json(json.as_bytes()).unwrap(), job);
    }

    #[test]
    fn test_malformed_message() {
        assert!(matches!(SigningJob::from_json(b"{\"documentKey\":1}"), Err(Error::Queue(_))));
    }

    #[test]
    fn test_state_sequence() {
        let mut state = JobState::Received;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            visited.push(next);
            state = next;
        }
        assert_eq!(visited.len(), 8);
        assert_eq!(state, JobState::Done);
        assert!(state.is_terminal());
        assert!(JobState::Failed.next().is_none());
        assert_eq!(JobState::IdentityIssued.to_string(), "IDENTITY_ISSUED");
    }

    #[test]
    fn test_failure_record_classifies_error() {
        let job = SigningJob::new("doc-1", "bob");
        let record = FailureRecord::new(&job, JobState::Received, &Error::StoreTimeout {
            key: "doc-1".to_string(),
            seconds: 5,
        });
        assert_eq!(record.kind, ErrorKind::StoreIo);
        assert!(record.retryable);

        let record = FailureRecord::new(&job, JobState::Downloaded, &Error::EmptyDocument);
        assert_eq!(record.kind, ErrorKind::EmptyDocument);
        assert!(!record.retryable);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"stage\":\"DOWNLOADED\""));
    }
}
