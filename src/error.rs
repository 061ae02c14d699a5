use crate::registry::NameCategory;
use thiserror::Error;

/// Failure to turn one raw system record into entity rows.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The registry has no id for a name the record depends on.
    #[error("no registry id for {category} {name:?}")]
    MissingId { category: NameCategory, name: String },
}

/// A dump line that could not be read as a system object.
#[derive(Debug, Error)]
pub enum DumpLineError {
    #[error("line is not a JSON object")]
    NotAnObject,
    #[error("malformed system record: {0}")]
    Json(#[from] serde_json::Error),
}
