use crate::file_status::InvalidTransition;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("Internal error: {0}")]
    Internal(String),
}
