#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown generation status: {0}")]
    UnknownStatus(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}
