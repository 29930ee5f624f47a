use thiserror::Error;

use crate::lifecycle::LoopState;

#[derive(Debug, Error)]
pub enum HatCheckError {
    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("camera stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error("daemon refused request: {0}")]
    Refused(String),

    #[error("invalid vocabulary: {0}")]
    Vocabulary(String),

    #[error("cannot {action} while {from}")]
    InvalidTransition { from: LoopState, action: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type HatCheckResult<T> = Result<T, HatCheckError>;
