use crate::model::{Field, VariantId};

/// Per-variant engine failures. A variant that hits one of these is skipped
/// and tallied as errored; the batch continues.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("variant `{variant_id}` has an empty path")]
    EmptyPath { variant_id: VariantId },

    #[error("inventory row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("field `{field}` cannot hold value `{value}`")]
    FieldValue { field: Field, value: String },

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
