use thiserror::Error;

/// Errors produced while converting a dynamic remote document into a typed
/// record at the boundary.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// A required field is absent from the document.
    #[error("Missing field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape.
    #[error("Invalid field `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

impl SnapshotError {
    pub(crate) fn invalid(field: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidField {
            field,
            reason: reason.to_string(),
        }
    }
}
