use thiserror::Error;

/// Fatal, run-aborting errors.
///
/// Per-lead and per-source failures never surface here; they are recovered
/// inside the orchestrator and reported as [`crate::models::EnrichmentError`]
/// records instead.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Filesystem errors while reading inputs or writing reports.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed tabular input or failed report write.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// Malformed JSON (model weights and similar).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The probability model could not be loaded.
    #[error("Model error: {0}")]
    Model(String),
    /// Programming faults, such as an unusable shared resource.
    #[error("Internal error: {0}")]
    Internal(String),
    /// Error with context chain for better debugging.
    #[error("{context}: {source}")]
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: f(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wraps_source() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = result.context("reading leads.csv").unwrap_err();
        assert_eq!(err.to_string(), "reading leads.csv: I/O error: missing");
    }

    #[test]
    fn test_with_context_is_lazy_on_success() {
        let result: Result<i32, AppError> = Ok(7);
        let value = result
            .with_context(|| panic!("context must not be evaluated"))
            .unwrap();
        assert_eq!(value, 7);
    }
}
