//! Invoice entry paths: OCR capture, bulk submission, views, posting.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use bigdecimal::BigDecimal;
use tracing::info;

use facturo_invoicing::{InvoiceHeader, InvoiceKey, InvoiceSubmission, SubmissionOrigin};
use facturo_ocr::OcrFields;

use crate::app::routes::blocking;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/recognize", post(recognize_and_store))
        .route("/batch", post(submit_batch))
        .route("/:reference", get(get_invoice))
        .route("/:reference/post", post(post_invoice))
}

/// POST /invoices/recognize
///
/// Body: raw image bytes. Runs OCR, extracts identifying fields, and upserts
/// an invoice through the same store as every other path.
pub async fn recognize_and_store(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    if body.is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "empty_body", "no image provided");
    }

    let recognizer = services.recognizer.clone();
    let fields = match blocking(move || facturo_ocr::scan_image(recognizer.as_ref(), &body)).await {
        Ok(fields) => fields,
        Err(e) => return errors::ocr_error_to_response(e),
    };

    info!(?fields.tax_id, ?fields.number, "fields detected on receipt");

    let Some(tax_id) = fields.tax_id.clone() else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "no supplier tax ID detected in the image",
        );
    };
    let Some((series, number)) = fields.number.as_deref().and_then(split_document_number) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "no document number detected in the image",
        );
    };

    let submission = ocr_submission(&fields, tax_id, series, number);
    let store = services.store.clone();
    match blocking(move || store.upsert_invoice(SubmissionOrigin::Ocr, submission)).await {
        Ok(outcome) => (
            if outcome.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            },
            Json(serde_json::json!({
                "created": outcome.created,
                "invoice_id": outcome.invoice_id.to_string(),
                "reference": outcome.reference,
                "status": outcome.status.display_label(),
                "detected": fields,
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// POST /invoices/batch
///
/// Bulk submission: each invoice is upserted independently and reported
/// individually; one malformed invoice does not sink the batch.
pub async fn submit_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::BatchRequest>,
) -> axum::response::Response {
    info!(count = body.invoices.len(), "bulk submission received");

    let mut results = Vec::with_capacity(body.invoices.len());
    for request in body.invoices {
        let reference = format!("{}-{}", request.series, request.number);
        let result = match request.into_submission() {
            Ok(submission) => {
                let store = services.store.clone();
                blocking(move || store.upsert_invoice(SubmissionOrigin::Bulk, submission))
                    .await
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        results.push(match result {
            Ok(outcome) => serde_json::json!({
                "reference": outcome.reference,
                "created": outcome.created,
                "status": outcome.status.display_label(),
            }),
            Err(message) => serde_json::json!({
                "reference": reference,
                "error": message,
            }),
        });
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "batch processed",
            "results": results,
        })),
    )
        .into_response()
}

/// GET /invoices/:reference
pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(reference): Path<String>,
) -> axum::response::Response {
    let key = match InvoiceKey::from_reference(&reference) {
        Ok(key) => key,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let store = services.store.clone();
    match blocking(move || store.fetch(&key)).await {
        Ok(Some(invoice)) => (StatusCode::OK, Json(dto::invoice_to_json(&invoice))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// POST /invoices/:reference/post
///
/// The explicit accounting action; terminal, bypasses ordering checks.
pub async fn post_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(reference): Path<String>,
) -> axum::response::Response {
    let key = match InvoiceKey::from_reference(&reference) {
        Ok(key) => key,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let store = services.store.clone();
    match blocking(move || store.mark_posted(&key)).await {
        Ok(invoice) => (StatusCode::OK, Json(dto::invoice_to_json(&invoice))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Split a detected document number into series and correlative. The printed
/// form usually carries a dash; when OCR loses it, the series is the fixed
/// four leading characters.
fn split_document_number(raw: &str) -> Option<(String, String)> {
    if let Some((series, number)) = raw.split_once('-') {
        return Some((series.to_string(), number.to_string()));
    }
    if raw.len() > 4 {
        let (series, number) = raw.split_at(4);
        return Some((series.to_string(), number.to_string()));
    }
    None
}

fn ocr_submission(
    fields: &OcrFields,
    tax_id: String,
    series: String,
    number: String,
) -> InvoiceSubmission {
    let total = fields.amount.clone().unwrap_or_else(|| BigDecimal::from(0));
    InvoiceSubmission {
        series,
        number,
        supplier_display_name: None,
        header: InvoiceHeader {
            currency: "PEN".to_string(),
            subtotal: total.clone(),
            tax_amount: BigDecimal::from(0),
            total,
            issued_on: fields.issued_on,
            supplier_tax_id: tax_id,
        },
        line_items: None,
        document: None,
    }
}
