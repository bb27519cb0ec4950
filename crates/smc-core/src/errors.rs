use std::time::Duration;

/// Core error type for the protocol layer.
///
/// The dispatcher raises the most specific variant it can determine. The driver
/// facade converts these into [`DriverError`] before they reach the host.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("server error ({}): {message}", .status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()))]
    Server {
        status: Option<u16>,
        message: String,
    },

    #[error("login rejected ({code}): {message}")]
    Login { code: i64, message: String },

    #[error("command failed ({code}): {message}")]
    Command { code: i64, message: String },

    #[error("identity {id} not found on remote")]
    IdentityNotFound { id: String },

    #[error("unresolved path parameter {{{name}}} in {path}")]
    UnresolvedPathParameter { path: String, name: String },

    #[error("throttled: quota resets in {}ms", .retry_after.as_millis())]
    Throttled { retry_after: Duration },

    #[error("request cancelled while throttled")]
    Cancelled,

    #[error("rate-limit store error: {0}")]
    Store(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Numeric code as reported by the remote (or the HTTP status), 0 otherwise.
    pub fn code(&self) -> i64 {
        match self {
            Error::Login { code, .. } | Error::Command { code, .. } => *code,
            Error::Server {
                status: Some(status),
                ..
            } => i64::from(*status),
            _ => 0,
        }
    }

    pub fn is_login(&self) -> bool {
        matches!(self, Error::Login { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Uniform failure type surfaced by [`crate::driver::MiraiDriver`].
///
/// The original core error is kept as `source` so diagnostics survive the
/// conversion.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("driver settings error: {0}")]
    Settings(String),

    #[error("{message}")]
    InvalidIdentity {
        message: String,
        #[source]
        source: Error,
    },

    #[error("driver error ({code}): {source}")]
    Driver {
        code: i64,
        #[source]
        source: Error,
    },
}

impl DriverError {
    /// Log the core failure and wrap it for the host application.
    pub fn surface(err: Error) -> Self {
        tracing::error!("[seat-connector][mirai] {} : {}", err.code(), err);
        match err {
            Error::Config(msg) => DriverError::Settings(msg),
            Error::IdentityNotFound { id } => DriverError::InvalidIdentity {
                message: format!("Identity {id} is not found on the remote server."),
                source: Error::IdentityNotFound { id },
            },
            other => DriverError::Driver {
                code: other.code(),
                source: other,
            },
        }
    }
}

impl From<Error> for DriverError {
    fn from(err: Error) -> Self {
        DriverError::surface(err)
    }
}
