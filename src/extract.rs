//! Text extraction from uploaded binary documents.
//!
//! Extraction is a black-box collaborator from the pipeline's point of view:
//! bytes plus a declared media type go in, plain UTF-8 text comes out, and
//! unparsable input fails with [`EngineError::Extraction`].

use crate::error::EngineError;

pub const MEDIA_PDF: &str = "application/pdf";
pub const MEDIA_PLAIN: &str = "text/plain";
pub const MEDIA_MARKDOWN: &str = "text/markdown";

/// Turns uploaded bytes into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], media_type: &str) -> Result<String, EngineError>;
}

/// Default extractor: PDF via `pdf-extract`, plain text and markdown as
/// UTF-8. Anything else is rejected — the upload allow-list should have
/// caught it earlier.
pub struct DefaultExtractor;

impl TextExtractor for DefaultExtractor {
    fn extract(&self, bytes: &[u8], media_type: &str) -> Result<String, EngineError> {
        match media_type {
            MEDIA_PDF => pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| EngineError::Extraction(format!("PDF extraction failed: {e}"))),
            MEDIA_PLAIN | MEDIA_MARKDOWN => String::from_utf8(bytes.to_vec())
                .map_err(|_| EngineError::Extraction("text is not valid UTF-8".to_string())),
            other => Err(EngineError::Extraction(format!(
                "unsupported media type: {other}"
            ))),
        }
    }
}
