//! SIRE reporting API client: period report export.
//!
//! The flow mirrors the authority's ticket model: authenticate, request an
//! export ticket for the period, poll the ticket until the report file is
//! ready, then download the archive. The bearer token is cached as an
//! explicit `{token, expires_at}` value owned by the client and refreshed
//! lazily; never shared module-level state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(3);
const MAX_POLLS: u32 = 60;

/// Terminal process-state code meaning "report ready".
const PROCESS_FINISHED: &str = "06";

/// Seconds shaved off the advertised token lifetime so a token is never used
/// right at its expiry edge.
const TOKEN_EXPIRY_SLACK_SECS: i64 = 60;

/// SIRE client error.
#[derive(Debug, Error)]
pub enum SireError {
    #[error("incomplete SIRE configuration: missing {0}")]
    IncompleteConfig(String),

    #[error("invalid period `{0}`: expected YYYYMM")]
    InvalidPeriod(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("export ticket request failed: {0}")]
    TicketRequest(String),

    #[error("timed out waiting for the report after {0} polls")]
    PollTimeout(u32),

    #[error("report download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Connection settings. Credentials are the portal account's, plus the API
/// client pair issued by the authority.
#[derive(Debug, Clone)]
pub struct SireConfig {
    pub client_id: String,
    pub client_secret: String,
    pub account_tax_id: String,
    pub sol_username: String,
    pub sol_password: String,
    pub auth_base_url: String,
    pub api_base_url: String,
}

impl SireConfig {
    /// Read configuration from the environment (`SIRE_CLIENT_ID`,
    /// `SIRE_CLIENT_SECRET`, `SIRE_ACCOUNT_TAX_ID`, `SIRE_SOL_USERNAME`,
    /// `SIRE_SOL_PASSWORD`, optional `SIRE_AUTH_BASE_URL`/`SIRE_API_BASE_URL`).
    pub fn from_env() -> Result<Self, SireError> {
        fn required(name: &str) -> Result<String, SireError> {
            std::env::var(name).map_err(|_| SireError::IncompleteConfig(name.to_string()))
        }

        Ok(Self {
            client_id: required("SIRE_CLIENT_ID")?,
            client_secret: required("SIRE_CLIENT_SECRET")?,
            account_tax_id: required("SIRE_ACCOUNT_TAX_ID")?,
            sol_username: required("SIRE_SOL_USERNAME")?,
            sol_password: required("SIRE_SOL_PASSWORD")?,
            auth_base_url: std::env::var("SIRE_AUTH_BASE_URL").unwrap_or_else(|_| {
                "https://api-seguridad.sunat.gob.pe/v1/clientessol".to_string()
            }),
            api_base_url: std::env::var("SIRE_API_BASE_URL").unwrap_or_else(|_| {
                "https://api-sire.sunat.gob.pe/v1/contribuyente/migeigv/libros".to_string()
            }),
        })
    }
}

/// Cached bearer token with its expiry.
#[derive(Debug, Clone)]
pub struct TokenCache {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenCache {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// The downloaded report archive, verbatim.
#[derive(Debug, Clone)]
pub struct ReportArchive {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    #[serde(rename = "numTicket")]
    num_ticket: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TicketStatusResponse {
    #[serde(default)]
    registros: Vec<TicketRecord>,
}

#[derive(Debug, Deserialize)]
struct TicketRecord {
    #[serde(rename = "codEstadoProceso")]
    process_state: Option<String>,
    #[serde(rename = "archivoReporte", default)]
    report_files: Vec<ReportFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReportFile {
    #[serde(rename = "nomArchivoReporte")]
    file_name: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    msg: Option<String>,
    #[serde(rename = "error_description", default)]
    error_description: Option<String>,
}

/// SIRE API client.
pub struct SireClient {
    http: reqwest::Client,
    config: SireConfig,
    token: Mutex<Option<TokenCache>>,
}

impl SireClient {
    pub fn new(config: SireConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token: Mutex::new(None),
        }
    }

    /// Run the full export flow for a `YYYYMM` period and return the report
    /// archive.
    pub async fn fetch_report(&self, period: &str) -> Result<ReportArchive, SireError> {
        if !is_valid_period(period) {
            return Err(SireError::InvalidPeriod(period.to_string()));
        }

        info!(period, "requesting invoicing report");

        let token = self.access_token().await?;
        let ticket = self.request_export_ticket(&token, period).await?;
        debug!(%ticket, "export ticket obtained");

        let report = self.poll_ticket(&token, &ticket, period).await?;
        info!(file = %report.file_name, "report file ready");

        self.download(&token, &ticket, period, report).await
    }

    async fn access_token(&self) -> Result<String, SireError> {
        let mut cached = self.token.lock().await;
        if let Some(cache) = cached.as_ref() {
            if cache.is_fresh(Utc::now()) {
                debug!("using cached token");
                return Ok(cache.token.clone());
            }
        }

        let url = format!("{}/{}/oauth2/token/", self.config.auth_base_url, self.config.client_id);
        let username = format!("{}{}", self.config.account_tax_id, self.config.sol_username);
        let form = [
            ("grant_type", "password"),
            ("scope", "https://api-sire.sunat.gob.pe"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("username", username.as_str()),
            ("password", self.config.sol_password.as_str()),
        ];

        let response = self.http.post(&url).form(&form).send().await?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            warn!(%message, "authentication failed");
            return Err(SireError::AuthRejected(message));
        }

        let auth: AuthResponse = response.json().await?;
        let cache = TokenCache {
            token: auth.access_token.clone(),
            expires_at: Utc::now()
                + chrono::Duration::seconds((auth.expires_in - TOKEN_EXPIRY_SLACK_SECS).max(0)),
        };
        *cached = Some(cache);

        Ok(auth.access_token)
    }

    async fn request_export_ticket(&self, token: &str, period: &str) -> Result<String, SireError> {
        let url = format!(
            "{}/rce/propuesta/web/propuesta/{}/exportacioncomprobantepropuesta",
            self.config.api_base_url, period
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[("codTipoArchivo", "0"), ("codOrigenEnvio", "2")])
            .send()
            .await?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            return Err(SireError::TicketRequest(message));
        }

        let ticket: TicketResponse = response.json().await?;
        ticket
            .num_ticket
            .ok_or_else(|| SireError::TicketRequest("no ticket number returned".to_string()))
    }

    async fn poll_ticket(
        &self,
        token: &str,
        ticket: &str,
        period: &str,
    ) -> Result<ReportFile, SireError> {
        let url = format!(
            "{}/rvierce/gestionprocesosmasivos/web/masivo/consultaestadotickets",
            self.config.api_base_url
        );

        for attempt in 1..=MAX_POLLS {
            debug!(attempt, max = MAX_POLLS, "polling ticket");

            let response = self
                .http
                .get(&url)
                .bearer_auth(token)
                .query(&[
                    ("perIni", period),
                    ("perFin", period),
                    ("page", "1"),
                    ("perPage", "20"),
                    ("numTicket", ticket),
                ])
                .send()
                .await?;

            // The ticket may not be visible yet right after creation.
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            if !response.status().is_success() {
                let message = error_message(response).await;
                return Err(SireError::TicketRequest(message));
            }

            let status: TicketStatusResponse = response.json().await?;
            if let Some(record) = status.registros.first() {
                if record.process_state.as_deref() == Some(PROCESS_FINISHED) {
                    if let Some(file) = record.report_files.first() {
                        return Ok(file.clone());
                    }
                }
                debug!(state = ?record.process_state, "process still running");
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Err(SireError::PollTimeout(MAX_POLLS))
    }

    async fn download(
        &self,
        token: &str,
        ticket: &str,
        period: &str,
        report: ReportFile,
    ) -> Result<ReportArchive, SireError> {
        let url = format!(
            "{}/rvierce/gestionprocesosmasivos/web/masivo/archivoreporte",
            self.config.api_base_url
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("nomArchivoReporte", report.file_name.as_str()),
                ("codTipoArchivoReporte", "00"),
                ("perTributario", period),
                ("codProceso", "10"),
                ("numTicket", ticket),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            return Err(SireError::Download(message));
        }

        let bytes = response.bytes().await?.to_vec();
        info!(file = %report.file_name, size = bytes.len(), "report archive downloaded");

        Ok(ReportArchive {
            file_name: report.file_name,
            bytes,
        })
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ApiErrorBody>().await {
        Ok(body) => body
            .error_description
            .or(body.msg)
            .unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    }
}

/// Tax periods are `YYYYMM`.
pub fn is_valid_period(period: &str) -> bool {
    if period.len() != 6 || !period.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    period[4..6]
        .parse::<u8>()
        .is_ok_and(|month| (1..=12).contains(&month))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_validation() {
        assert!(is_valid_period("202512"));
        assert!(is_valid_period("202401"));
        assert!(!is_valid_period("202413"));
        assert!(!is_valid_period("2025"));
        assert!(!is_valid_period("2025-12"));
        assert!(!is_valid_period("abcdef"));
    }

    #[test]
    fn token_cache_freshness() {
        let cache = TokenCache {
            token: "t".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert!(cache.is_fresh(Utc::now()));
        assert!(!cache.is_fresh(Utc::now() + chrono::Duration::seconds(60)));
    }
}
