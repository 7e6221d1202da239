use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl From<notify::Error> for AppError {
    fn from(err: notify::Error) -> Self {
        AppError::Watcher(err.to_string())
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Failure reported by an analysis handler.
///
/// `Permanent` means the file itself cannot be processed and retrying would fail the same
/// way; the record gets its sticky failure flag. `Transient` leaves the record eligible for
/// the next scan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }
}

impl From<AppError> for HandlerError {
    fn from(err: AppError) -> Self {
        HandlerError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_serializes_as_message() {
        let err = AppError::Watcher("not a directory: /nope".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Watcher error: not a directory: /nope\"");
    }

    #[test]
    fn store_errors_inside_handlers_are_transient() {
        let err: HandlerError = AppError::General("locked".to_string()).into();
        assert!(!err.is_permanent());
        assert!(HandlerError::Permanent("corrupt".into()).is_permanent());
    }
}
