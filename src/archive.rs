//! Archive packager: turns successful outputs into one downloadable artifact.
//!
//! One output passes through untouched. Two or more are bundled into a zip
//! that is built entirely in memory, so a packaging failure can never leave
//! a half-written bundle on the wire.

use crate::error::JobError;
use crate::model::{Artifact, Converted};
use crate::pipeline::content_type_for;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Bundle file name for a tool: `converted-<slug>.zip`.
pub fn bundle_name(tool_slug: &str) -> String {
    format!("converted-{tool_slug}.zip")
}

/// Package outputs into a single artifact.
///
/// Entries keep outcome order. Duplicate names are refused before any bytes
/// are written.
pub fn pack(outputs: Vec<Converted>, bundle_name: &str) -> Result<Artifact, JobError> {
    let mut seen = HashSet::with_capacity(outputs.len());
    if let Some(dup) = outputs.iter().find(|c| !seen.insert(c.name.as_str())) {
        return Err(JobError::PackagingConflict {
            name: dup.name.clone(),
        });
    }

    let mut outputs = outputs.into_iter();
    let first = match (outputs.next(), outputs.len()) {
        (None, _) => return Err(JobError::NothingToPackage),
        (Some(only), 0) => {
            debug!("Single output {} passed through", only.name);
            return Ok(Artifact {
                content_type: content_type_for(&only.name),
                file_name: only.name,
                bytes: only.bytes,
                bundled: false,
            });
        }
        (Some(first), _) => first,
    };

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut entries = 0usize;
    for output in std::iter::once(first).chain(outputs) {
        writer
            .start_file(output.name.as_str(), options)
            .map_err(|e| JobError::Packaging(format!("{}: {e}", output.name)))?;
        writer
            .write_all(&output.bytes)
            .map_err(|e| JobError::Packaging(format!("{}: {e}", output.name)))?;
        entries += 1;
    }
    let bytes = writer
        .finish()
        .map_err(|e| JobError::Packaging(e.to_string()))?
        .into_inner();

    info!("Bundled {} entries into {} ({} bytes)", entries, bundle_name, bytes.len());
    Ok(Artifact {
        file_name: bundle_name.to_string(),
        content_type: "application/zip",
        bytes,
        bundled: true,
    })
}

/// Write an artifact to `path` atomically (temp file + rename).
///
/// A reader never sees a partially written file, even if the process dies
/// mid-write.
pub async fn write_artifact(artifact: &Artifact, path: impl AsRef<Path>) -> Result<(), JobError> {
    let path = path.as_ref();
    let io_err = |source| JobError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, &artifact.bytes)
        .await
        .map_err(io_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err)?;

    debug!("Wrote {} bytes to {}", artifact.bytes.len(), path.display());
    Ok(())
}
