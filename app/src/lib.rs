//! Scrub: redaction of personal data in PDF and XML documents.
//!
//! [`Redactor`] drives one document through extraction, detection, span
//! resolution, redaction and serialization; batches run documents
//! independently and are packaged as a ZIP archive.

pub mod archive;
pub mod batch;
pub mod config;
pub mod inputs;
pub mod pipeline;

pub use archive::{archive_bytes, write_archive, ArchiveError, ARCHIVE_NAME, MANIFEST_NAME};
pub use batch::{BatchReport, SkippedDocument};
pub use config::{ConfigError, RedactConfig};
pub use inputs::collect_inputs;
pub use pipeline::{output_name, InputDocument, RedactError, RedactedDocument, Redactor, Stage};
