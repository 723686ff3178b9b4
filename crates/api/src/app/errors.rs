use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use facturo_core::DomainError;
use facturo_infra::jobs::QueueError;
use facturo_infra::store::StoreError;
use facturo_ocr::OcrError;
use facturo_sunat::SireError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Domain(e) => domain_error_to_response(e),
        StoreError::Repository(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
    }
}

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::NotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job {id} unknown or past its retention window"),
        ),
        QueueError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", msg)
        }
    }
}

pub fn ocr_error_to_response(err: OcrError) -> axum::response::Response {
    match err {
        OcrError::BinaryMissing(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ocr_engine_missing",
            err.to_string(),
        ),
        OcrError::NoTextDetected => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "no_text_detected", err.to_string())
        }
        OcrError::EngineFailed { .. } | OcrError::Io(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "ocr_error", err.to_string())
        }
    }
}

pub fn sire_error_to_response(err: SireError) -> axum::response::Response {
    match err {
        SireError::InvalidPeriod(_) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_period", err.to_string())
        }
        SireError::AuthRejected(_) => {
            json_error(StatusCode::UNAUTHORIZED, "authority_auth_rejected", err.to_string())
        }
        SireError::PollTimeout(_) => {
            json_error(StatusCode::GATEWAY_TIMEOUT, "authority_timeout", err.to_string())
        }
        SireError::TicketRequest(_) | SireError::Download(_) | SireError::Http(_) => {
            json_error(StatusCode::BAD_GATEWAY, "authority_error", err.to_string())
        }
        SireError::IncompleteConfig(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "sire_config", err.to_string())
        }
    }
}
