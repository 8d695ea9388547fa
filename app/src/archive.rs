//! ZIP packaging of a batch.

use crate::batch::BatchReport;
use crate::pipeline::{InputDocument, Redactor};
use std::collections::HashSet;
use std::io::{Cursor, Seek, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ARCHIVE_NAME: &str = "Redacted_Files.zip";
pub const MANIFEST_NAME: &str = "skipped.json";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes every output of `report` to `writer`, plus `skipped.json` when
/// `manifest` is set. Returns the writer.
pub fn write_archive<W: Write + Seek>(
    writer: W,
    report: &BatchReport,
    manifest: bool,
) -> Result<W, ArchiveError> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used: HashSet<String> = HashSet::new();
    if manifest {
        used.insert(MANIFEST_NAME.to_string());
    }

    for doc in &report.outputs {
        let name = unique_name(&entry_name(&doc.name), &mut used);
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&doc.bytes)?;
        log::debug!("[Archive] added {} ({} bytes)", name, doc.bytes.len());
    }

    if manifest {
        zip.start_file(MANIFEST_NAME, options)?;
        zip.write_all(&serde_json::to_vec_pretty(&report.skipped)?)?;
    }

    Ok(zip.finish()?)
}

pub fn archive_bytes(report: &BatchReport, manifest: bool) -> Result<Vec<u8>, ArchiveError> {
    Ok(write_archive(Cursor::new(Vec::new()), report, manifest)?.into_inner())
}

impl Redactor {
    /// Redacts a batch and packages the outputs as one ZIP archive.
    pub fn redact_to_archive(
        &self,
        inputs: &[InputDocument],
        manifest: bool,
    ) -> Result<(Vec<u8>, BatchReport), ArchiveError> {
        let report = self.redact_batch(inputs);
        let bytes = archive_bytes(&report, manifest)?;
        log::info!(
            "[Archive] {} entr(ies), {} bytes",
            report.outputs.len() + usize::from(manifest),
            bytes.len()
        );
        Ok((bytes, report))
    }
}

/// Relative entry path: no leading `/`, no `.` or `..` segments.
fn entry_name(name: &str) -> String {
    let parts: Vec<&str> = name
        .split(['/', '\\'])
        .filter(|p| !p.is_empty() && *p != "." && *p != "..")
        .collect();
    if parts.is_empty() {
        "document".to_string()
    } else {
        parts.join("/")
    }
}

/// `a.pdf`, then `a_2.pdf`, `a_3.pdf`, ...
fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let base_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (base, ext) = match name[base_start..].rfind('.') {
        Some(dot) if dot > 0 => name.split_at(base_start + dot),
        _ => (name, ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}{}", base, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
