use thiserror::Error;

#[derive(Error, Debug)]
pub enum EpochError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Model training failed: {0}")]
    ModelTraining(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
