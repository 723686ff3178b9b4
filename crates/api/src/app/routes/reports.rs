//! Authority reporting: per-period report export via the SIRE API.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/reports/:period", get(fetch_report))
}

/// GET /sunat/reports/:period
///
/// Runs the full token/ticket/poll/download flow for a `YYYYMM` period. The
/// archive comes back base64-encoded; decoding it is the caller's business.
pub async fn fetch_report(
    Extension(services): Extension<Arc<AppServices>>,
    Path(period): Path<String>,
) -> axum::response::Response {
    let Some(sire) = services.sire.as_ref() else {
        return errors::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "sire_disabled",
            "SIRE reporting is not configured",
        );
    };

    match sire.fetch_report(&period).await {
        Ok(archive) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "period": period,
                "file_name": archive.file_name,
                "content_base64": BASE64.encode(&archive.bytes),
            })),
        )
            .into_response(),
        Err(e) => errors::sire_error_to_response(e),
    }
}
