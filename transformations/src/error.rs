use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformationError {
    #[error("Unsupported operation type: {0}")]
    UnsupportedOperation(String),

    #[error("Operation is missing the 'type' field")]
    MissingOperationType,

    #[error("Malformed operation: {0}")]
    MalformedOperation(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Input buffer is required for the first operation")]
    InputRequired,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No operation could be built from the request")]
    NoOperationProduced,

    #[error("Pipeline has {count} operations, the limit is {limit}")]
    TooManyOperations { count: usize, limit: usize },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Operation '{operation}' failed: {reason}")]
    TransformFailed { operation: &'static str, reason: String },

    #[error("Processing was cancelled")]
    Cancelled,

    #[error("Processing exceeded the {0:?} deadline")]
    DeadlineExceeded(std::time::Duration),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TransformationError {
    pub(crate) fn invalid_param(name: &'static str, reason: impl Into<String>) -> Self {
        TransformationError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Errors caused by the shape of the request rather than by processing.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedOperation(_)
                | Self::MissingOperationType
                | Self::MalformedOperation(_)
                | Self::InvalidParameter { .. }
                | Self::NoOperationProduced
                | Self::TooManyOperations { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TransformationError>;
