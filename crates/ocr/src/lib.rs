//! `facturo-ocr` — receipt text recognition boundary and field extraction.
//!
//! The text-recognition engine is an external collaborator behind
//! [`TextRecognizer`]; everything downstream of the raw text (the tolerant,
//! best-effort field extraction) is pure and lives in [`extract`].

pub mod extract;
pub mod recognizer;

pub use extract::{OcrFields, extract_fields};
pub use recognizer::{OcrError, TesseractCli, TesseractConfig, TextRecognizer};

use tracing::debug;

/// Run the full OCR path: recognize text, then extract invoice fields.
///
/// An image that yields no text at all is an error; an image whose text
/// matches none of the field patterns yields an empty [`OcrFields`]; the
/// caller decides which fields it cannot live without.
pub fn scan_image(recognizer: &dyn TextRecognizer, image: &[u8]) -> Result<OcrFields, OcrError> {
    let text = recognizer.recognize(image)?;
    if text.trim().is_empty() {
        return Err(OcrError::NoTextDetected);
    }

    debug!(length = text.len(), "OCR text extracted");
    Ok(extract_fields(&text))
}
