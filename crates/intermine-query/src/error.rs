use intermine_model::ModelError;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueryError {
    #[snafu(display("invalid path '{}': {}", path, reason))]
    InvalidPathError { path: String, reason: String },

    #[snafu(display("invalid constraint on '{}': {}", path, reason))]
    InvalidConstraintError { path: String, reason: String },

    #[snafu(display("invalid constraint logic '{}': {}", logic, reason))]
    InvalidLogicError { logic: String, reason: String },

    #[snafu(display("invalid sort order on '{}': {}", path, reason))]
    InvalidSortOrderError { path: String, reason: String },

    #[snafu(display("query view is empty"))]
    EmptyViewError,

    #[snafu(display("there is no constraint with the code '{}'", code))]
    UnknownCodeError { code: char },

    #[snafu(display("constraint '{}' is not editable", code))]
    NotEditableError { code: char },

    #[snafu(display("failed to serialize query: {}", source))]
    SerializeError { source: serde_json::Error },

    #[snafu(display("failed to parse query document: {}", source))]
    DeserializeError { source: serde_json::Error },

    #[snafu(display("failed to read query xml: {}", source))]
    XmlError { source: quick_xml::Error },

    #[snafu(display("malformed query document: {}", reason))]
    DocumentError { reason: String },
}

pub type Result<T> = std::result::Result<T, QueryError>;

/// Maps a model lookup failure onto the query error taxonomy.
pub(crate) fn path_error(path: &str, err: ModelError) -> QueryError {
    match err {
        ModelError::InvalidPathError { path, reason } => QueryError::InvalidPathError { path, reason },
        other => QueryError::InvalidPathError {
            path: String::from(path),
            reason: other.to_string(),
        },
    }
}
