use crate::{Error, error::StorageError};

/// Extension trait for Result types to simplify storage error mapping
///
/// Backends use this to fold their driver errors into [`StorageError`] so the
/// guard can treat every infrastructure failure the same way (fail closed).
///
/// # Example
///
/// ```rust,ignore
/// use portcullis_core::error::utilities::DatabaseResultExt;
///
/// // Instead of:
/// // query.execute(&pool).await.map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;
///
/// // Use:
/// query.execute(&pool).await.map_db_err()?;
/// ```
pub trait DatabaseResultExt<T> {
    /// Convert a backend error to a storage database error
    fn map_db_err(self) -> Result<T, Error>;

    /// Convert a backend error to a storage database error with additional context
    fn map_db_err_with_context(self, context: &str) -> Result<T, Error>;

    /// Convert a backend error to [`StorageError::Unavailable`]
    fn map_unavailable(self, context: &str) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> DatabaseResultExt<T> for Result<T, E> {
    fn map_db_err(self) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(e.to_string())))
    }

    fn map_db_err_with_context(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Database(format!("{context}: {e}"))))
    }

    fn map_unavailable(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| Error::Storage(StorageError::Unavailable(format!("{context}: {e}"))))
    }
}
