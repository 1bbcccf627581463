use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crux_adapters::VendorError;
use crux_storage::RegistryError;
use crux_sync::ImportError;
use serde_json::json;

/// Error returned by every handler, rendered as `{"error": {"code", "message"}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Validation(String),
    /// Board credentials were refused while connecting.
    #[error(transparent)]
    BoardLogin(VendorError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Import(#[from] ImportError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            ApiError::BoardLogin(err) => {
                let code = match err {
                    VendorError::InvalidCredentials => "INVALID_CREDENTIALS",
                    VendorError::Unavailable { .. } => "VENDOR_UNAVAILABLE",
                    VendorError::Malformed(_) => "MALFORMED_VENDOR_RESPONSE",
                };
                (StatusCode::BAD_REQUEST, code, err.to_string())
            }
            ApiError::Registry(err) => classify_registry_error(err),
            ApiError::Import(err) => classify_import_error(err),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

fn internal(err: &dyn std::fmt::Display) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "STORAGE_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_registry_error(err: &RegistryError) -> (StatusCode, &'static str, String) {
    match err {
        RegistryError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        RegistryError::AlreadyConnected(_) => (StatusCode::CONFLICT, "CONFLICT", err.to_string()),
        RegistryError::Vault(_) | RegistryError::Store(_) => internal(err),
    }
}

fn classify_import_error(err: &ImportError) -> (StatusCode, &'static str, String) {
    let code = err.code();
    match err {
        ImportError::NotFound => (StatusCode::NOT_FOUND, code, err.to_string()),
        ImportError::InvalidCredentials => (StatusCode::BAD_REQUEST, code, err.to_string()),
        ImportError::VendorUnavailable { status, .. } => {
            let message = match status {
                Some(status) => format!("Board vendor unavailable (status {status})"),
                None => "Board vendor unavailable".to_string(),
            };
            (StatusCode::BAD_GATEWAY, code, message)
        }
        ImportError::MalformedVendorResponse(_) => (
            StatusCode::BAD_GATEWAY,
            code,
            "Board vendor returned an unexpected response".to_string(),
        ),
        ImportError::TamperedCredential => (
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            "Stored board credentials are unreadable; reconnect the board".to_string(),
        ),
        ImportError::UnsupportedBoard(_) => (StatusCode::BAD_REQUEST, code, err.to_string()),
        ImportError::Store(_) => internal(err),
    }
}
