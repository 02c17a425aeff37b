// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::too_many_arguments)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::new_without_default)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # PDF Sealer
//!
//! Asynchronous PDF signing: stamp a visible attestation onto page 1, then
//! sign the stamped file with a detached CMS signature embedded by
//! incremental update.
//!
//! ## Core Features
//!
//! - **Visual stamp**: "DIGITALLY SIGNED BY <NAME>" plus a date line,
//!   appended to the first page's content (full rewrite)
//! - **Signature embedding**: fixed-size `/Contents` placeholder, ByteRange
//!   digest over everything else, append-only update that leaves earlier
//!   bytes untouched (ISO 32000-1 §12.8)
//! - **CMS signatures**: SHA-256 with RSA, adbe.pkcs7.detached (RFC 5652)
//! - **Signer identities**: long-lived PEM key pairs, or self-signed
//!   certificates issued per job
//! - **Verification**: ByteRange digest, signer-info signature, certificate
//!   trust and validity
//! - **Pipeline**: queue-driven workers with per-job state tracking, failure
//!   records and at-least-once redelivery
//!
//! ## Quick Start
//!
//! ```no_run
//! use pdf_sealer::config::SealerConfig;
//! use pdf_sealer::pipeline::{intake, DocumentStore, LogSink, MemoryQueue, MemoryStore, SigningOrchestrator};
//! use std::sync::Arc;
//!
//! # async fn run() -> pdf_sealer::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let queue = MemoryQueue::new(5);
//!
//! let job = intake::submit(store.as_ref(), &queue, "contract.pdf", std::fs::read("contract.pdf")?, "alice").await?;
//!
//! let orchestrator = SigningOrchestrator::from_config(SealerConfig::new(), store.clone(), Arc::new(LogSink))?;
//! orchestrator.run_until_idle(&queue).await?;
//!
//! let signed_key = orchestrator.config().signed_key(&job.document_key);
//! std::fs::write("contract.signed.pdf", store.get(&signed_key).await?)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! - [`object`], [`lexer`], [`parser`], [`xref`], [`objstm`], [`decoders`],
//!   [`document`]: reading PDF files
//! - [`writer`]: full rewrites and incremental updates
//! - [`stamp`], [`signatures`]: the two document transformations
//! - [`pipeline`], [`config`]: the service around them

#![warn(missing_docs)]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;

// Stream decoders
pub mod decoders;

// Page geometry
pub mod geometry;

// PDF writing
pub mod writer;

// Visual stamp
pub mod stamp;

// Digital signatures
pub mod signatures;

// Configuration
pub mod config;

// Signing pipeline
pub mod pipeline;

// Re-exports
pub use config::SealerConfig;
pub use document::PdfDocument;
pub use error::{Error, ErrorKind, Result};
pub use stamp::{StampConfig, VisualStamper};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
