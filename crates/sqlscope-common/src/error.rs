//! Common error types used throughout sqlscope.
//!
//! Every crate in the workspace funnels its failures into [`Error`]. The HTTP
//! middleware derives a status code from it via [`Error::http_status`].

/// Common error type for sqlscope.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The database was configured with neither a primary URL nor any bind.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No engine is registered under the requested bind.
    #[error("Bind {0} is not defined")]
    UnknownBind(String),

    /// The current logical context has no active session.
    #[error("No session is available")]
    NoSession,

    /// The database facade was used before `initialize` completed.
    #[error("Database is not initialized")]
    NotInitialized,

    /// A table routes to a bind that has no engine and there is no default engine.
    #[error("No engine is bound for table '{0}'")]
    UnboundTable(String),

    /// A connection URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    /// A row expected to exist was not found.
    #[error("Row not found: {0}")]
    NotFound(String),

    /// The session was used in a way its options do not allow.
    #[error("Session error: {0}")]
    Session(String),

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new Configuration error.
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an UnknownBind error. `None` names the default bind.
    pub fn unknown_bind(bind: Option<&str>) -> Self {
        Self::UnknownBind(match bind {
            Some(name) => format!("'{name}'"),
            None => "<default>".to_string(),
        })
    }

    /// Create a new InvalidUrl error.
    pub fn invalid_url<S: Into<String>>(msg: S) -> Self {
        Self::InvalidUrl(msg.into())
    }

    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Session error.
    pub fn session<S: Into<String>>(msg: S) -> Self {
        Self::Session(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Map this error to an HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Configuration(_)
            | Error::UnknownBind(_)
            | Error::NoSession
            | Error::NotInitialized
            | Error::UnboundTable(_)
            | Error::InvalidUrl(_)
            | Error::Session(_)
            | Error::Internal(_) => 500,
            Error::Database(_) | Error::Io(_) => 503,
        }
    }

    /// Short machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration_error",
            Error::UnknownBind(_) => "unknown_bind",
            Error::NoSession => "no_session",
            Error::NotInitialized => "not_initialized",
            Error::UnboundTable(_) => "unbound_table",
            Error::InvalidUrl(_) => "invalid_url",
            Error::NotFound(_) => "not_found",
            Error::Session(_) => "session_error",
            Error::Database(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::configuration("either url or binds must be set");
        assert_eq!(
            err.to_string(),
            "Configuration error: either url or binds must be set"
        );

        let err = Error::NoSession;
        assert_eq!(err.to_string(), "No session is available");

        let err = Error::unknown_bind(Some("invalid"));
        assert_eq!(err.to_string(), "Bind 'invalid' is not defined");

        let err = Error::unknown_bind(None);
        assert_eq!(err.to_string(), "Bind <default> is not defined");

        let err = Error::database("disk I/O error");
        assert_eq!(err.to_string(), "Database error: disk I/O error");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(Error::NoSession.http_status(), 500);
        assert_eq!(Error::not_found("mock_model 2").http_status(), 404);
        assert_eq!(Error::database("locked").http_status(), 503);
        assert_eq!(Error::NotInitialized.http_status(), 500);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NoSession.code(), "no_session");
        assert_eq!(Error::unknown_bind(Some("x")).code(), "unknown_bind");
        assert_eq!(Error::invalid_url("mysql://").code(), "invalid_url");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.db");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn test_result_type() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(ok_fn().unwrap(), 42);

        fn err_fn() -> Result<i32> {
            Err(Error::NoSession)
        }
        assert!(matches!(err_fn(), Err(Error::NoSession)));
    }
}
