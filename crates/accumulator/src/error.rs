use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccumulatorError {
    #[error("Invalid target: position {0} is not a leaf")]
    InvalidTarget(u64),

    #[error("Duplicate target: position {0}")]
    DuplicateTarget(u64),

    #[error("Node not found at position {0}")]
    MissingNode(u64),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Forest is full")]
    ForestFull,

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, AccumulatorError>;
