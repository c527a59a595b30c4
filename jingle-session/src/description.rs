//! Describing local files for offers and request answers

use std::path::Path;

use chrono::{DateTime, Utc};
use jingle_common::hash::HashAlgorithm;
use jingle_common::protocol::{FileElement, HashElement};
use jingle_common::validators::validate_file_name;

use crate::digest::DigestService;
use crate::error::JingleError;

/// Detect MIME type from file content using magic bytes
///
/// Falls back to a few extension-based guesses for text formats that have
/// no magic bytes.
fn detect_mime_type(path: &Path) -> Option<String> {
    if let Some(kind) = infer::get_from_path(path).ok().flatten() {
        return Some(kind.mime_type().to_string());
    }

    let extension = path.extension()?.to_str()?.to_lowercase();
    let mime = match extension.as_str() {
        "txt" | "log" | "nfo" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "json" => "application/json",
        "toml" => "application/toml",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Build the file description for `path`
///
/// The advertised name is `name_override` or the path's file name. Size,
/// modification date and media type come from the filesystem and the
/// digest is computed with `algorithm`.
pub async fn describe_file(
    path: &Path,
    name_override: Option<&str>,
    algorithm: HashAlgorithm,
    digests: &dyn DigestService,
) -> Result<FileElement, JingleError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(JingleError::FileNotFound(path.to_path_buf())),
    };

    let name = match name_override {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string(),
    };
    validate_file_name(&name).map_err(|e| JingleError::InvalidDescription(e.to_string()))?;

    let size = metadata.len();
    let date = metadata.modified().ok().map(DateTime::<Utc>::from);
    let digest = digests.compute_file(algorithm, path, 0, size).await?;

    Ok(FileElement {
        name: Some(name),
        media_type: detect_mime_type(path),
        date,
        size: Some(size),
        hashes: vec![HashElement::new(algorithm, digest)],
        ..Default::default()
    })
}
