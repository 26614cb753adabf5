//! Error types for v-zip

use thiserror::Error;

/// Result type for v-zip operations
pub type Result<T> = std::result::Result<T, ZipError>;

/// Error types that can occur during ZIP operations
#[derive(Debug, Error)]
pub enum ZipError {
    /// I/O error from the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No end-of-central-directory record could be located
    #[error("file is not a ZIP archive")]
    NotAZip,

    /// Bad magic number, truncated record, or inconsistent headers
    #[error("corrupt ZIP archive: {0}")]
    Corrupt(String),

    /// The archive uses a feature this library does not implement
    #[error("unsupported ZIP feature: {0}")]
    Unsupported(String),

    /// The entry is encrypted and no password was supplied
    #[error("entry {0:?} is encrypted, password required")]
    PasswordRequired(String),

    /// Password verification failed
    #[error("bad password for entry {0:?}")]
    BadPassword(String),

    /// CRC-32 mismatch at end of stream
    #[error("bad CRC-32 for entry {0:?}")]
    BadCrc(String),

    /// WinZip AES authentication code mismatch
    #[error("bad HMAC check for entry {0:?}")]
    BadHmac(String),

    /// The archive would need ZIP64 extensions but they are disabled
    #[error("{0} would require ZIP64 extensions")]
    TooLarge(&'static str),

    /// Operation attempted while a write handle is open on the archive
    #[error("archive is busy: {0}")]
    Busy(&'static str),

    /// Lookup of a name that is not in the archive
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// Operation not valid for the archive's mode or lifecycle state
    #[error("invalid mode: {0}")]
    InvalidMode(&'static str),

    /// Caller passed an argument the format cannot represent
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<ZipError> for std::io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
