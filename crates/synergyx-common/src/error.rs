use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynergyError {
    /// Fatal: wrong feature file, missing column, width mismatch.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Training interrupted")]
    Interrupted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SynergyError {
    pub fn config(msg: impl Into<String>) -> Self {
        SynergyError::Config(msg.into())
    }

    /// Configuration errors abort the run; everything else is recoverable
    /// at the record or batch level.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SynergyError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, SynergyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(SynergyError::config("missing column drug_id").is_fatal());
        assert!(!SynergyError::Data("bad row".into()).is_fatal());
        assert!(!SynergyError::Interrupted.is_fatal());
    }

    #[test]
    fn test_config_error_message() {
        let err = SynergyError::config("fusion width 10 != 12");
        assert_eq!(err.to_string(), "Configuration error: fusion width 10 != 12");
    }
}
