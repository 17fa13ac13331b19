use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },
    #[error("weights for {index} do not sum to 1 (sum={sum})")]
    WeightSum { index: String, sum: f64 },
    #[error("observed has {observed} points but predicted has {predicted}")]
    DimensionMismatch { observed: usize, predicted: usize },
}

impl EngineError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
