//! Document retrieval collaborator boundary.
//!
//! Retrieval is a multi-step browser automation against the portal and can
//! legitimately run for tens of seconds to low minutes. It is consumed as an
//! opaque call: one pass/fail outcome per invocation, with failures typed so
//! callers branch on the variant rather than sniffing message text. Retries
//! belong to the job queue, never to the retriever.

use std::io::Write;
use std::process::{Command, Stdio};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Portal login credentials carried inside a job payload.
#[derive(Clone, Serialize, Deserialize)]
pub struct PortalCredentials {
    /// Tax ID of the account holder (the business doing the lookup).
    pub account_tax_id: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("account_tax_id", &self.account_tax_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parameters of one acquisition: which issuer's document to fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionRequest {
    pub issuer_tax_id: String,
    pub series: String,
    pub number: String,
    pub credentials: PortalCredentials,
}

/// Typed retrieval failure.
#[derive(Debug, Clone, Error)]
pub enum RetrievalFailure {
    /// The automation runner is not installed/reachable.
    #[error("automation command `{0}` not found")]
    AutomationMissing(String),

    /// The portal rejected the provided credentials.
    #[error("portal login rejected")]
    LoginRejected,

    /// The portal has no such document.
    #[error("document not found on portal: {0}")]
    DocumentNotFound(String),

    /// The automation ran and failed (navigation break, portal change, ...).
    #[error("automation failed: {0}")]
    AutomationFailed(String),

    /// The automation produced output this side cannot understand.
    #[error("automation produced malformed output: {0}")]
    MalformedOutput(String),
}

/// Files downloaded for one document.
#[derive(Debug, Clone, Default)]
pub struct RetrievedFiles {
    /// The signed XML; the document of record.
    pub primary: Vec<u8>,
    /// Rendered PDF, when the portal exposes one.
    pub rendered: Option<Vec<u8>>,
    /// Authority acknowledgment (CDR), when available.
    pub acknowledgment: Option<Vec<u8>>,
}

/// Outcome of a successful retrieval.
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub files: RetrievedFiles,
    /// The primary document parsed into a semi-structured tree, ready for the
    /// tolerant transformer.
    pub structured: serde_json::Value,
    /// Authority-side status string, when the acknowledgment carried one.
    pub authority_status: Option<String>,
}

/// Opaque retrieval collaborator.
pub trait DocumentRetriever: Send + Sync {
    fn retrieve(&self, request: &AcquisitionRequest) -> Result<RetrievedDocument, RetrievalFailure>;
}

/// Configuration for the script-based retriever.
#[derive(Debug, Clone)]
pub struct ScriptRetrieverConfig {
    /// Automation command (the browser-driving script runner).
    pub command: String,
    pub args: Vec<String>,
}

/// Production retriever: shells out to the browser-automation script.
///
/// Contract with the script: the request is written to stdin as JSON; the
/// script prints a single JSON object to stdout:
/// `{"structured": ..., "files": {"xml": "<base64>", "pdf": ..., "cdr": ...},
///   "authority_status": ...}` on success, or `{"error": {"kind": ...,
///   "message": ...}}` on failure.
#[derive(Debug, Clone)]
pub struct ScriptRetriever {
    config: ScriptRetrieverConfig,
}

impl ScriptRetriever {
    pub fn new(config: ScriptRetrieverConfig) -> Self {
        Self { config }
    }
}

impl DocumentRetriever for ScriptRetriever {
    fn retrieve(&self, request: &AcquisitionRequest) -> Result<RetrievedDocument, RetrievalFailure> {
        debug!(
            issuer = %request.issuer_tax_id,
            series = %request.series,
            number = %request.number,
            "launching portal automation"
        );

        let payload = serde_json::to_vec(request)
            .map_err(|e| RetrievalFailure::MalformedOutput(e.to_string()))?;

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    RetrievalFailure::AutomationMissing(self.config.command.clone())
                }
                _ => RetrievalFailure::AutomationFailed(e.to_string()),
            })?;

        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(&payload)
            .map_err(|e| RetrievalFailure::AutomationFailed(e.to_string()))?;

        let output = child
            .wait_with_output()
            .map_err(|e| RetrievalFailure::AutomationFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, "portal automation failed");
            return Err(RetrievalFailure::AutomationFailed(format!(
                "{}: {}",
                output.status, stderr
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| RetrievalFailure::MalformedOutput(e.to_string()))?;

        parse_script_output(value)
    }
}

/// Decode the script's JSON report into a [`RetrievedDocument`].
pub fn parse_script_output(
    value: serde_json::Value,
) -> Result<RetrievedDocument, RetrievalFailure> {
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unspecified")
            .to_string();
        return Err(match error.get("kind").and_then(|k| k.as_str()) {
            Some("login_rejected") => RetrievalFailure::LoginRejected,
            Some("document_not_found") => RetrievalFailure::DocumentNotFound(message),
            _ => RetrievalFailure::AutomationFailed(message),
        });
    }

    let files = value
        .get("files")
        .ok_or_else(|| RetrievalFailure::MalformedOutput("missing `files`".to_string()))?;

    let primary = decode_file(files, "xml")?
        .ok_or_else(|| RetrievalFailure::MalformedOutput("missing `files.xml`".to_string()))?;

    Ok(RetrievedDocument {
        files: RetrievedFiles {
            primary,
            rendered: decode_file(files, "pdf")?,
            acknowledgment: decode_file(files, "cdr")?,
        },
        structured: value
            .get("structured")
            .cloned()
            .unwrap_or(serde_json::Value::Null),
        authority_status: value
            .get("authority_status")
            .and_then(|s| s.as_str())
            .map(str::to_string),
    })
}

fn decode_file(
    files: &serde_json::Value,
    name: &str,
) -> Result<Option<Vec<u8>>, RetrievalFailure> {
    match files.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(encoded)) => BASE64
            .decode(encoded)
            .map(Some)
            .map_err(|e| RetrievalFailure::MalformedOutput(format!("files.{name}: {e}"))),
        Some(other) => Err(RetrievalFailure::MalformedOutput(format!(
            "files.{name}: expected base64 string, got {other}"
        ))),
    }
}
