//! Error type shared by the loaders.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    #[error("Failed to parse {what} from '{value}'")]
    Parse { what: &'static str, value: String },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: String, value: f32 },
    #[error("Duplicate name '{0}'")]
    DuplicateName(String),
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
}

pub type CoreResult<T> = Result<T, CoreError>;
