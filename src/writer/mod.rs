//! PDF writing.
//!
//! ```text
//! [ContentStreamBuilder] (overlay operators)
//!     ↓
//! [PdfWriter] full rewrite        [IncrementalUpdate] append-only update
//!     ↓                               ↓
//! [ObjectSerializer] (object syntax)
//!     ↓
//! PDF bytes
//! ```

mod content_stream;
mod incremental;
mod object_serializer;
mod pdf_writer;

pub use content_stream::{ContentStreamBuilder, ContentStreamOp};
pub use incremental::{IncrementalOutput, IncrementalUpdate};
pub use object_serializer::{hex_upper, ObjectSerializer};
pub use pdf_writer::PdfWriter;
