/// All errors that can be returned by a CasebookStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another transaction modified
    /// the row concurrently. The expected version was not found.
    #[error("concurrent conflict on {table}/{id}: expected version {expected_version}")]
    ConcurrentConflict {
        table: &'static str,
        id: String,
        expected_version: i64,
    },

    /// No row with the given id exists in `table`.
    #[error("{table} not found: {id}")]
    NotFound { table: &'static str, id: String },

    /// A row with this id already exists in `table`.
    #[error("{table} already exists: {id}")]
    AlreadyExists { table: &'static str, id: String },

    /// Another committed row in the same project already carries this name.
    #[error("{table} name '{name}' is already taken in project {project_id}")]
    NameTaken {
        table: &'static str,
        project_id: String,
        name: String,
    },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether this error is an optimistic-concurrency loss that a caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::ConcurrentConflict { .. })
    }
}
