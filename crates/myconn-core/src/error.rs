//! Error types for myconn operations.

use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type for driver-level operations.
#[derive(Debug)]
pub enum Error {
    /// Connection establishment failed
    Connect(ConnectError),
    /// Database selection failed
    Select(SelectError),
    /// Statement execution failed
    Exec(ExecError),
    /// Protocol errors (wire-level)
    Protocol(ProtocolError),
    /// I/O errors
    Io(std::io::Error),
}

/// Fatal failures of a single connect attempt. No handle survives any of them.
#[derive(Debug)]
pub enum ConnectError {
    /// Transport or authentication rejected by the server
    HandshakeFailed {
        message: String,
        source: Option<BoxError>,
    },
    /// TLS was requested but the server accepted the session unencrypted
    SslDowngraded,
    /// The configured charset could not be applied
    CharsetUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectErrorKind {
    /// The server refused the database name
    Rejected,
    /// The session is not connected
    Disconnected,
    /// The transport failed while selecting
    Transport,
}

/// A failed database switch. The session remains usable.
#[derive(Debug)]
pub struct SelectError {
    pub kind: SelectErrorKind,
    pub database: String,
    pub message: String,
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorKind {
    /// The server rejected the statement
    Server,
    /// The transport failed mid-statement
    Transport,
    /// The session was already marked disconnected
    Disconnected,
    /// The server response could not be decoded
    Protocol,
}

/// A failed statement. The session remains usable unless `kind` says otherwise.
#[derive(Debug)]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub message: String,
    pub code: Option<u16>,
    pub sqlstate: Option<String>,
    pub sql: Option<String>,
    pub source: Option<BoxError>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
}

impl ConnectError {
    /// Build a handshake failure from a message.
    pub fn handshake(message: impl Into<String>) -> Self {
        ConnectError::HandshakeFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Build a handshake failure wrapping the underlying cause.
    pub fn handshake_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ConnectError::HandshakeFailed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The charset name carried by `CharsetUnavailable`.
    pub fn charset(&self) -> Option<&str> {
        match self {
            ConnectError::CharsetUnavailable(name) => Some(name),
            _ => None,
        }
    }
}

impl ExecError {
    /// Build an error from a server ERR packet's fields.
    pub fn server(code: u16, sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        let sqlstate = sqlstate.into();
        ExecError {
            kind: ExecErrorKind::Server,
            message: message.into(),
            code: Some(code),
            sqlstate: (!sqlstate.is_empty()).then_some(sqlstate),
            sql: None,
            source: None,
        }
    }

    pub fn disconnected() -> Self {
        ExecError {
            kind: ExecErrorKind::Disconnected,
            message: "session is disconnected".to_string(),
            code: None,
            sqlstate: None,
            sql: None,
            source: None,
        }
    }

    /// Attach the SQL text that was submitted.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// MySQL error 1062 (ER_DUP_ENTRY).
    pub fn is_duplicate_key(&self) -> bool {
        self.code == Some(1062)
    }

    /// MySQL errors 1451/1452 (foreign key violations).
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self.code, Some(1451 | 1452))
    }
}

impl Error {
    /// Is this an error after which the physical connection should be discarded?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connect(_) | Error::Protocol(_) | Error::Io(_) => true,
            Error::Exec(e) => matches!(
                e.kind,
                ExecErrorKind::Transport | ExecErrorKind::Disconnected | ExecErrorKind::Protocol
            ),
            Error::Select(e) => matches!(
                e.kind,
                SelectErrorKind::Transport | SelectErrorKind::Disconnected
            ),
        }
    }

    /// Get SQLSTATE if available (e.g., "23000" for a duplicate key)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Exec(e) => e.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Exec(e) => e.sql.as_deref(),
            _ => None,
        }
    }

    /// MySQL server error code, if the server produced this error.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Exec(e) => e.code,
            Error::Select(e) => e.code,
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connect(e) => write!(f, "Connection error: {}", e),
            Error::Select(e) => write!(f, "Select error: {}", e),
            Error::Exec(e) => write!(f, "Query error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::HandshakeFailed { message, .. } => {
                write!(f, "handshake failed: {}", message)
            }
            ConnectError::SslDowngraded => write!(
                f,
                "configured for an SSL connection, but got an unencrypted connection instead"
            ),
            ConnectError::CharsetUnavailable(charset) => {
                write!(f, "unable to set the configured connection charset ('{}')", charset)
            }
        }
    }
}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(
                f,
                "cannot select database '{}': {} ({})",
                self.database, self.message, code
            ),
            None => write!(f, "cannot select database '{}': {}", self.database, self.message),
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.sqlstate, self.code) {
            (Some(state), Some(code)) => {
                write!(f, "{} (SQLSTATE {}, code {})", self.message, state, code)
            }
            (None, Some(code)) => write!(f, "{} (code {})", self.message, code),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn boxed_source(source: Option<&BoxError>) -> Option<&(dyn std::error::Error + 'static)> {
    source.map(|err| err.as_ref() as &(dyn std::error::Error + 'static))
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectError::HandshakeFailed { source, .. } => boxed_source(source.as_ref()),
            _ => None,
        }
    }
}

impl std::error::Error for SelectError {}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        boxed_source(self.source.as_ref())
    }
}

impl std::error::Error for ProtocolError {}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connect(e) => Some(e),
            Error::Select(e) => Some(e),
            Error::Exec(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectError> for Error {
    fn from(err: ConnectError) -> Self {
        Error::Connect(err)
    }
}

impl From<SelectError> for Error {
    fn from(err: SelectError) -> Self {
        Error::Select(err)
    }
}

impl From<ExecError> for Error {
    fn from(err: ExecError) -> Self {
        Error::Exec(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

/// Result type alias for myconn operations.
pub type Result<T> = std::result::Result<T, Error>;
