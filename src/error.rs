use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;
use transformations::TransformationError;

#[derive(Debug, Error)]
pub enum ImageWorkerError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Invalid base64 image: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transformation(#[from] TransformationError),
}

impl ImageWorkerError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::MalformedRequest(_) | Self::Base64(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Internal(_) | Self::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            Self::Transformation(e) => match e {
                TransformationError::UnsupportedOperation(_) => {
                    (StatusCode::BAD_REQUEST, "unsupported_operation")
                }
                TransformationError::NoOperationProduced => {
                    (StatusCode::BAD_REQUEST, "no_operation")
                }
                e if e.is_client_error() => (StatusCode::BAD_REQUEST, "invalid_request"),
                TransformationError::Decode(_) | TransformationError::ImageError(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "processing_error")
                }
                TransformationError::TransformFailed { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "transformation_error")
                }
                TransformationError::DeadlineExceeded(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout")
                }
                TransformationError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            },
        }
    }
}

impl ResponseError for ImageWorkerError {
    fn status_code(&self) -> StatusCode {
        self.classify().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type) = self.classify();
        HttpResponse::build(status).json(serde_json::json!({
            "error": error_type,
            "message": self.to_string()
        }))
    }
}

pub type Result<T> = std::result::Result<T, ImageWorkerError>;
