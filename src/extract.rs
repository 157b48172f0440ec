//! Text extraction for source documents.
//!
//! The ingestor hands paths here and gets back plain UTF-8 text. Markdown
//! and plain text are read directly; PDFs go through `pdf-extract`. An
//! extraction failure is returned as an error and the ingestor skips the
//! document with a warning — one corrupt file never fails a batch.

use std::path::Path;

/// Extraction error. No panics; the pipeline skips the document.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    Unreadable(String),
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(ext) => write!(f, "unsupported format: {}", ext),
            ExtractError::Unreadable(e) => write!(f, "unreadable document: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract plain text from a source document on disk.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "md" | "txt" | "text" => {
            std::fs::read_to_string(path).map_err(|e| ExtractError::Unreadable(e.to_string()))
        }
        "pdf" => {
            let bytes =
                std::fs::read(path).map_err(|e| ExtractError::Unreadable(e.to_string()))?;
            extract_pdf(&bytes)
        }
        other => Err(ExtractError::UnsupportedFormat(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_returns_error() {
        let err = extract_file(Path::new("notes.docx")).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[test]
    fn missing_file_returns_error() {
        let err = extract_file(Path::new("/nonexistent/notes.txt")).unwrap_err();
        assert!(matches!(err, ExtractError::Unreadable(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }
}
