//! Text-recognition collaborator boundary.

use std::io::Write;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, warn};

/// OCR boundary error. Callers branch on the variant, never on message text;
/// in particular a missing engine binary is its own condition, not a substring
/// of some wrapped I/O message.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The OCR engine binary is not installed/reachable.
    #[error("OCR engine binary `{0}` not found")]
    BinaryMissing(String),

    /// The engine ran but reported failure.
    #[error("OCR engine exited with {status}: {stderr}")]
    EngineFailed { status: String, stderr: String },

    /// The engine produced no text at all.
    #[error("no text detected in image")]
    NoTextDetected,

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque text-recognition collaborator: image bytes in, raw text out.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Tesseract invocation settings.
#[derive(Debug, Clone)]
pub struct TesseractConfig {
    pub binary: String,
    pub lang: String,
    pub oem: u8,
    pub psm: u8,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            lang: "spa".to_string(),
            oem: 1,
            psm: 3,
        }
    }
}

/// Tesseract CLI adapter: pipes the image through stdin/stdout.
#[derive(Debug, Clone, Default)]
pub struct TesseractCli {
    config: TesseractConfig,
}

impl TesseractCli {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        debug!(bytes = image.len(), lang = %self.config.lang, "running OCR");

        let mut child = Command::new(&self.config.binary)
            .args(["stdin", "stdout"])
            .args(["-l", &self.config.lang])
            .args(["--oem", &self.config.oem.to_string()])
            .args(["--psm", &self.config.psm.to_string()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => OcrError::BinaryMissing(self.config.binary.clone()),
                _ => OcrError::Io(e),
            })?;

        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(image)?;

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, "OCR engine failed");
            return Err(OcrError::EngineFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
