use aerobook_core::{CoreError, ErrorKind};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    Core(CoreError),
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidOperation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ExternalDependency => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            AppError::AuthenticationError(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, Value::Null)
            }
            AppError::Core(err) => {
                let status = status_for(err.kind());
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("Internal Server Error: {}", err);
                    (
                        status,
                        err.code(),
                        "Internal Server Error".to_string(),
                        Value::Null,
                    )
                } else {
                    (status, err.code(), err.to_string(), err.details())
                }
            }
        };

        let body = Json(json!({
            "code": code,
            "message": message,
            "details": details,
        }));

        (status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}
