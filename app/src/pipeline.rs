//! Per-document redaction pipeline.
//!
//! A document moves through `Received → Extracted → Detected → Resolved →
//! Redacted → Serialized`. Any failure stops that document only and is
//! reported with the stage it could not reach.

use crate::config::{ConfigError, RedactConfig};
use scrub_core::{CoreError, Detectors, Document, DocumentKind, RedactionPlan, TextBlock};
use scrub_pdf::PdfDocument;
use scrub_verify::{verify_output, VerifyOptions, VerifyResult};
use scrub_xml::XmlDocument;
use serde::{Deserialize, Serialize};
use std::fmt;

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Extracted,
    Detected,
    Resolved,
    Redacted,
    Serialized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Extracted => "extracted",
            Stage::Detected => "detected",
            Stage::Resolved => "resolved",
            Stage::Redacted => "redacted",
            Stage::Serialized => "serialized",
        };
        f.write_str(name)
    }
}

/// A named upload. The name may carry a relative folder path.
#[derive(Debug, Clone)]
pub struct InputDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedDocument {
    /// Name of the input.
    pub source_name: String,
    /// `<base>_Redacted<ext>`, with `/` separators.
    pub name: String,
    pub kind: DocumentKind,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub blocks: usize,
    pub redactions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerifyResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum RedactError {
    #[error("{name}: unsupported format")]
    UnsupportedFormat { name: String },
    #[error("{name}: {size} bytes exceeds the {limit} byte limit")]
    TooLarge { name: String, size: u64, limit: u64 },
    /// `stage` is the stage the document could not reach.
    #[error("{name}: not {stage}: {source}")]
    Failed {
        name: String,
        stage: Stage,
        #[source]
        source: CoreError,
    },
}

impl RedactError {
    pub fn name(&self) -> &str {
        match self {
            RedactError::UnsupportedFormat { name }
            | RedactError::TooLarge { name, .. }
            | RedactError::Failed { name, .. } => name,
        }
    }

    /// Failure class, shared with [`CoreError::kind`].
    pub fn kind(&self) -> &'static str {
        match self {
            RedactError::UnsupportedFormat { .. } => "unsupported_format",
            RedactError::TooLarge { .. } => "too_large",
            RedactError::Failed { source, .. } => source.kind(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            RedactError::Failed { stage, .. } => *stage,
            _ => Stage::Received,
        }
    }
}

/// Owns the detectors and configuration shared by every document.
pub struct Redactor {
    config: RedactConfig,
    detectors: Detectors,
    log_full_text: bool,
}

impl Redactor {
    pub fn new(config: RedactConfig) -> Result<Self, ConfigError> {
        let detectors = config.build_detectors()?;
        Ok(Self::with_detectors(config, detectors))
    }

    /// Uses a caller-supplied detector set, e.g. a different analyzer.
    pub fn with_detectors(config: RedactConfig, detectors: Detectors) -> Self {
        let log_full_text = std::env::var("SCRUB_LOG_FULL_TEXT")
            .ok()
            .and_then(|v| crate::config::parse_flag(&v))
            .unwrap_or(false);
        Self {
            config,
            detectors,
            log_full_text,
        }
    }

    pub fn config(&self) -> &RedactConfig {
        &self.config
    }

    pub fn detectors(&self) -> &Detectors {
        &self.detectors
    }

    /// Redacts one document. Every resource it allocates is dropped before
    /// returning, on success or failure.
    pub fn redact(&self, input: &InputDocument) -> Result<RedactedDocument, RedactError> {
        let kind = DocumentKind::from_name(&input.name).map_err(|_| {
            log::warn!("[Pipeline] {}: rejected, not a PDF or XML file", input.name);
            RedactError::UnsupportedFormat {
                name: input.name.clone(),
            }
        })?;

        let size = input.bytes.len() as u64;
        if size > self.config.max_file_bytes {
            log::warn!(
                "[Pipeline] {}: rejected, {} bytes exceeds the limit",
                input.name,
                size
            );
            return Err(RedactError::TooLarge {
                name: input.name.clone(),
                size,
                limit: self.config.max_file_bytes,
            });
        }

        log::info!("[Pipeline] Processing: {}", input.name);
        let result = match kind {
            DocumentKind::Pdf => self.run::<PdfDocument>(input),
            DocumentKind::Xml => self.run::<XmlDocument>(input),
        };
        if let Err(e) = &result {
            log::error!("[Pipeline] {}", e);
        }
        result
    }

    fn run<D: Document>(&self, input: &InputDocument) -> Result<RedactedDocument, RedactError> {
        let name = input.name.as_str();
        let fail = |stage: Stage| {
            move |source: CoreError| RedactError::Failed {
                name: name.to_string(),
                stage,
                source,
            }
        };
        let mut stage = Stage::Received;

        let mut doc = D::load(&input.bytes).map_err(fail(Stage::Extracted))?;
        let blocks = doc.text_blocks().map_err(fail(Stage::Extracted))?;
        self.advance(name, &mut stage, Stage::Extracted);
        for block in &blocks {
            self.log_block(name, block);
        }

        let session = self.detectors.session();
        let mut detections = Vec::with_capacity(blocks.len());
        for block in &blocks {
            detections.push(doc.detect(block, &session).map_err(fail(Stage::Detected))?);
        }
        self.advance(name, &mut stage, Stage::Detected);

        let options = self.config.resolve_options();
        let plans: Vec<RedactionPlan> = blocks
            .iter()
            .zip(detections)
            .map(|(block, detection)| RedactionPlan::resolve(&block.text, detection, options))
            .collect();
        self.advance(name, &mut stage, Stage::Resolved);

        let mut redactions = 0;
        for (block, plan) in blocks.iter().zip(&plans) {
            if plan.is_empty() {
                continue;
            }
            redactions += doc.apply(block, plan).map_err(fail(Stage::Redacted))?;
        }
        if self.config.clean_metadata {
            let removed = doc.scrub_metadata().map_err(fail(Stage::Redacted))?;
            log::debug!("[Pipeline] {}: {} metadata item(s) removed", name, removed);
        }
        self.advance(name, &mut stage, Stage::Redacted);

        let bytes = doc.save().map_err(fail(Stage::Serialized))?;
        self.advance(name, &mut stage, Stage::Serialized);

        let verification = self.config.verify.then(|| {
            verify_output(D::KIND, &bytes, &self.detectors, &VerifyOptions::default())
        });

        log::info!(
            "[Pipeline] {}: {} redaction(s) across {} block(s)",
            name,
            redactions,
            blocks.len()
        );
        Ok(RedactedDocument {
            source_name: name.to_string(),
            name: output_name(name),
            kind: D::KIND,
            bytes,
            blocks: blocks.len(),
            redactions,
            verification,
        })
    }

    fn advance(&self, name: &str, stage: &mut Stage, next: Stage) {
        log::debug!("[Pipeline] {}: {} -> {}", name, stage, next);
        *stage = next;
    }

    fn log_block(&self, name: &str, block: &TextBlock) {
        if self.log_full_text {
            log::debug!("[Pipeline] {} {}: {}", name, block.location, block.text);
        } else {
            log::debug!(
                "[Pipeline] {} {}: {}",
                name,
                block.location,
                preview(&block.text)
            );
        }
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// `dir\report.pdf` → `dir/report_Redacted.pdf`.
pub fn output_name(name: &str) -> String {
    let normalized = name.replace('\\', "/");
    let base_start = normalized.rfind('/').map(|i| i + 1).unwrap_or(0);
    match normalized[base_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let (base, ext) = normalized.split_at(base_start + dot);
            format!("{}_Redacted{}", base, ext)
        }
        _ => format!("{}_Redacted", normalized),
    }
}
