//! Asynchronous signing pipeline.
//!
//! ```text
//! upload ──► [intake::submit] ──► DocumentStore (<uuid>_<name>)
//!                  │
//!                  ▼
//!              JobQueue {"documentKey", "requestedBy"}
//!                  │
//!                  ▼
//! [SigningOrchestrator] RECEIVED → DOWNLOADED → STAMPED → IDENTITY_ISSUED
//!                       → DIGEST_COMPUTED → SIGNATURE_EMBEDDED → UPLOADED → DONE
//!                  │                                   (any step) → FAILED
//!                  ├── DONE:   signed_<documentKey> stored, message acked
//!                  └── FAILED: FailureRecord to the FailureSink, message nacked
//! ```
//!
//! Delivery is at-least-once. The signed key is derived from the job key, so
//! a redelivered job overwrites its earlier result.

pub mod intake;
pub mod job;
pub mod orchestrator;
pub mod queue;
pub mod sink;
pub mod store;

pub use job::{FailureRecord, JobOutcome, JobState, SigningJob};
pub use orchestrator::{RunSummary, SigningOrchestrator};
pub use queue::{Delivery, JobQueue, MemoryQueue};
pub use sink::{FailureSink, LogSink, MemorySink};
pub use store::{BlobMetadata, DocumentStore, FsStore, MemoryStore, PDF_CONTENT_TYPE};
