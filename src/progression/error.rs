use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgressionError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("student not found: {0}")]
    StudentNotFound(String),
}

impl ProgressionError {
    /// Stable wire code for the sidecar error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ProgressionError::Db(_) => "db_query_failed",
            ProgressionError::StudentNotFound(_) => "not_found",
        }
    }
}
