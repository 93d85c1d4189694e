//! Error types for PetraDB.
//!
//! Every fallible operation returns [`Result<T>`]. An [`Error`] is a
//! tagged value carrying a numeric [`ErrorCode`], a severity
//! [`ErrorLevel`], the originating module, and a human-readable message
//! with optional details.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Convenient Result type alias, in the style of `std::io::Result`.
pub type Result<T> = std::result::Result<T, Error>;

/// Severity of an error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorLevel {
    Info,
    Warning,
    Error,
    /// Infrastructure failure (corrupt WAL, failed fsync). Poisons the
    /// component that raised it.
    Fatal,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorLevel::Info => "INFO",
            ErrorLevel::Warning => "WARNING",
            ErrorLevel::Error => "ERROR",
            ErrorLevel::Fatal => "FATAL",
        };
        f.write_str(s)
    }
}

/// Numeric error codes, grouped in families:
///
/// - `1xxx` generic
/// - `2xxx` SQL syntax/semantic (surfaced by the parser, passed through)
/// - `3xxx` database/table/column existence
/// - `4xxx` constraint violations
/// - `5xxx` transactional
/// - `6xxx` systemic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    Unknown = 1000,
    InvalidParameter = 1001,
    NotFound = 1002,
    PermissionDenied = 1003,

    SqlSyntaxError = 2000,
    SqlSemanticError = 2001,
    SqlTypeMismatch = 2002,

    DatabaseNotExist = 3000,
    DatabaseAlreadyExists = 3001,
    TableNotExist = 3002,
    TableAlreadyExists = 3003,
    ColumnNotExist = 3004,
    ColumnAlreadyExists = 3005,
    IndexNotExist = 3006,
    IndexAlreadyExists = 3007,
    UserNotExist = 3008,
    UserAlreadyExists = 3009,

    ConstraintViolation = 4000,
    NotNullViolation = 4001,
    UniqueViolation = 4002,
    PrimaryKeyViolation = 4003,
    ForeignKeyViolation = 4004,
    CheckViolation = 4005,

    TransactionError = 5000,
    DeadlockDetected = 5001,
    ConcurrencyConflict = 5002,

    OutOfMemory = 6000,
    DiskIoError = 6001,
    NetworkError = 6002,
    WalCorrupted = 6003,
}

impl ErrorCode {
    /// Numeric value of the code.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Default severity for this code family.
    pub fn default_level(self) -> ErrorLevel {
        match self.as_u32() {
            6000..=6999 => ErrorLevel::Fatal,
            _ => ErrorLevel::Error,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u32())
    }
}

/// A tagged error record.
///
/// Displayed as `[module] LEVEL CODE: message (details)`, matching the
/// format written by a configured log sink.
#[derive(Debug, Error)]
#[error("[{module}] {level} {code}: {message}{}", details_suffix(.details))]
pub struct Error {
    pub code: ErrorCode,
    pub level: ErrorLevel,
    pub module: &'static str,
    pub message: String,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn details_suffix(details: &Option<String>) -> String {
    match details {
        Some(details) => format!(" ({})", details),
        None => String::new(),
    }
}

impl Error {
    /// Create an error with the code family's default severity.
    pub fn new(code: ErrorCode, module: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            level: code.default_level(),
            module,
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a details string.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Override the severity.
    pub fn with_level(mut self, level: ErrorLevel) -> Self {
        self.level = level;
        self
    }

    /// True for FATAL errors, which poison the component that raised them.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.level == ErrorLevel::Fatal
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorCode::DiskIoError, "storage", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_format() {
        let err = Error::new(ErrorCode::TableNotExist, "catalog", "table 'users' does not exist");
        let s = format!("{}", err);
        assert!(s.starts_with("[catalog] ERROR TableNotExist(3002): table 'users' does not exist"));
    }

    #[test]
    fn test_error_details_appended() {
        let err = Error::new(ErrorCode::UniqueViolation, "dml", "duplicate key")
            .with_details("column 'id' value '1'");
        assert!(format!("{}", err).ends_with("(column 'id' value '1')"));
    }

    #[test]
    fn test_io_error_is_fatal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: Error = io_err.into();
        assert_eq!(err.code, ErrorCode::DiskIoError);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_code_families() {
        assert_eq!(ErrorCode::PrimaryKeyViolation.as_u32(), 4003);
        assert_eq!(ErrorCode::DeadlockDetected.as_u32(), 5001);
        assert_eq!(ErrorCode::PermissionDenied.default_level(), ErrorLevel::Error);
        assert_eq!(ErrorCode::DiskIoError.default_level(), ErrorLevel::Fatal);
    }
}
