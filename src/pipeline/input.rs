//! Input validation: make sure the user-supplied path is a readable PDF.
//!
//! Both pdfium and lopdf produce opaque errors for a missing file or a
//! non-PDF, so the `%PDF` magic bytes are checked up front and the caller
//! gets an error that says what is actually wrong.

use crate::error::TocError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate a local file path, checking existence, permissions and PDF magic.
pub fn resolve_local(path: impl AsRef<Path>) -> Result<PathBuf, TocError> {
    let path = path.as_ref().to_path_buf();

    if !path.exists() {
        return Err(TocError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(TocError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(TocError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(TocError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}
