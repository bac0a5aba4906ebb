//! Error types for the text channel.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbedError>;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Model download failed: {0}")]
    Download(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The pair lists and the cell matrix disagree on the batch size.
    #[error("Batch mismatch: {a} structures in slot A, {b} in slot B, {cells} cell rows")]
    BatchMismatch { a: usize, b: usize, cells: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<candle_core::Error> for EmbedError {
    fn from(e: candle_core::Error) -> Self {
        EmbedError::Inference(e.to_string())
    }
}

impl From<tokenizers::Error> for EmbedError {
    fn from(e: tokenizers::Error) -> Self {
        EmbedError::Tokenizer(e.to_string())
    }
}

impl From<hf_hub::api::sync::ApiError> for EmbedError {
    fn from(e: hf_hub::api::sync::ApiError) -> Self {
        EmbedError::Download(e.to_string())
    }
}

impl From<EmbedError> for synergyx_common::SynergyError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::ModelLoad(msg) | EmbedError::Download(msg) => {
                synergyx_common::SynergyError::config(format!("text channel: {}", msg))
            }
            other => synergyx_common::SynergyError::Data(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synergyx_common::SynergyError;

    #[test]
    fn test_load_failures_are_fatal_downstream() {
        let err: SynergyError = EmbedError::ModelLoad("missing weights".into()).into();
        assert!(err.is_fatal());
        let err: SynergyError = EmbedError::BatchMismatch { a: 2, b: 3, cells: 2 }.into();
        assert!(!err.is_fatal());
    }
}
