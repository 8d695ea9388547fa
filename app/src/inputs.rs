//! Reading inputs from the filesystem.

use crate::pipeline::InputDocument;
use scrub_core::DocumentKind;
use std::fs;
use std::path::Path;

/// Loads files and folders. A file is taken as given, even with an
/// unsupported extension, so that it is reported as skipped. A folder is
/// scanned recursively for `.pdf`/`.xml` files, which are named by their path
/// from the folder's parent, e.g. `scans/2024/a.pdf`.
pub fn collect_inputs<P: AsRef<Path>>(paths: &[P]) -> std::io::Result<Vec<InputDocument>> {
    let mut inputs = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if !path.is_dir() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            inputs.push(InputDocument::new(name, fs::read(path)?));
            continue;
        }

        let root = path.parent().unwrap_or(path);
        let mut found = Vec::new();
        for entry in walkdir::WalkDir::new(path) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let name = relative.to_string_lossy().replace('\\', "/");
            if DocumentKind::from_name(&name).is_ok() {
                found.push((name, entry.path().to_path_buf()));
            }
        }

        // Sort for determinism
        found.sort();
        log::info!(
            "[Inputs] {}: {} document(s)",
            path.display(),
            found.len()
        );
        for (name, file) in found {
            inputs.push(InputDocument::new(name, fs::read(file)?));
        }
    }
    Ok(inputs)
}
