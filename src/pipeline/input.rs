//! Input resolution: a PDF given as a filesystem path or an in-memory buffer.
//!
//! Uploads arrive as bytes and batch inputs as paths; pdfium opens both
//! directly, so nothing is written to disk here. The `%PDF` magic is checked
//! up front so a wrong file type fails with a clear error instead of a
//! pdfium parse failure.

use crate::error::PipelineError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF document to process.
#[derive(Debug, Clone)]
pub enum PdfSource {
    /// A file on disk.
    Path(PathBuf),
    /// Raw PDF bytes, e.g. an upload. `name` is used in logs and errors.
    Bytes { name: String, data: Arc<[u8]> },
}

impl PdfSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        PdfSource::Path(path.into())
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        PdfSource::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Human-readable name for logs and error messages.
    pub fn display_name(&self) -> String {
        match self {
            PdfSource::Path(p) => p.display().to_string(),
            PdfSource::Bytes { name, .. } => name.clone(),
        }
    }
}

/// Validate that the source exists, is readable, and starts with `%PDF`.
pub fn validate(source: &PdfSource) -> Result<(), PipelineError> {
    match source {
        PdfSource::Path(path) => validate_path(path),
        PdfSource::Bytes { name, data } => check_magic(name, data),
    }
}

fn validate_path(path: &Path) -> Result<(), PipelineError> {
    if !path.exists() {
        return Err(PipelineError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut magic = Vec::with_capacity(PDF_MAGIC.len());
    match std::fs::File::open(path) {
        Ok(f) => {
            f.take(PDF_MAGIC.len() as u64)
                .read_to_end(&mut magic)
                .map_err(|e| PipelineError::CorruptPdf {
                    source_name: path.display().to_string(),
                    detail: e.to_string(),
                })?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PipelineError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(PipelineError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    check_magic(&path.display().to_string(), &magic)?;
    debug!("Resolved local PDF: {}", path.display());
    Ok(())
}

fn check_magic(name: &str, data: &[u8]) -> Result<(), PipelineError> {
    if data.starts_with(PDF_MAGIC) {
        Ok(())
    } else {
        Err(PipelineError::NotAPdf {
            source_name: name.to_string(),
            magic: data.iter().take(PDF_MAGIC.len()).copied().collect(),
        })
    }
}

/// True for file names with a `.pdf` extension, any case.
pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn bytes_with_pdf_magic_are_accepted() {
        let src = PdfSource::from_bytes("upload.pdf", b"%PDF-1.7\n...".to_vec());
        assert!(validate(&src).is_ok());
        assert_eq!(src.display_name(), "upload.pdf");
    }

    #[test]
    fn non_pdf_bytes_are_rejected() {
        let src = PdfSource::from_bytes("notes.txt", b"hello".to_vec());
        let err = validate(&src).unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { .. }));
        assert!(err.is_conversion_failure());
    }

    #[test]
    fn empty_bytes_are_rejected() {
        let src = PdfSource::from_bytes("empty.pdf", Vec::new());
        assert!(matches!(
            validate(&src),
            Err(PipelineError::NotAPdf { .. })
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let src = PdfSource::from_path("/definitely/not/here.pdf");
        assert!(matches!(
            validate(&src),
            Err(PipelineError::FileNotFound { .. })
        ));
    }

    #[test]
    fn file_magic_is_checked() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%PDF-1.4 body").unwrap();
        assert!(validate(&PdfSource::from_path(tmp.path())).is_ok());

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(b"PK\x03\x04zip").unwrap();
        assert!(validate(&PdfSource::from_path(bad.path())).is_err());
    }

    #[test]
    fn pdf_extension_is_case_insensitive() {
        assert!(has_pdf_extension(Path::new("a/B.PDF")));
        assert!(has_pdf_extension(Path::new("contract.pdf")));
        assert!(!has_pdf_extension(Path::new("contract.pdf.json")));
        assert!(!has_pdf_extension(Path::new("README")));
    }
}
