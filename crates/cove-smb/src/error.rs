//! Session-layer error types
//!
//! Errors at this level are errno-shaped: they describe what the SMB
//! server (or the transport) reported, without knowing which entry name
//! the caller was working with. The filesystem layer attaches that
//! context when it translates these into its public error taxonomy.

use thiserror::Error;

/// Session-layer result type
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors reported by an SMB backend or the I/O driver
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The path does not name an entry on the share
    #[error("no such file or directory")]
    NotFound,

    /// Directory removal was attempted on a populated directory
    #[error("directory not empty")]
    NotEmpty,

    /// The server denied access to the entry
    #[error("access denied")]
    AccessDenied,

    /// A file operation was attempted on a directory
    #[error("is a directory")]
    IsDirectory,

    /// A directory operation was attempted on a file
    #[error("not a directory")]
    NotADirectory,

    /// An entry with that name already exists
    #[error("entry already exists")]
    AlreadyExists,

    /// The connection URL could not be parsed
    #[error("invalid share URL {url:?}: {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// What was wrong with it
        reason: String,
    },

    /// The requested authentication mode is missing required inputs
    #[error("invalid authentication: {0}")]
    InvalidAuth(String),

    /// Establishing the session failed
    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    /// The context's driver thread has shut down
    #[error("smb context is closed")]
    ContextClosed,

    /// The completion was abandoned before it was delivered
    #[error("operation cancelled")]
    Cancelled,

    /// Any other backend failure, message carried verbatim
    #[error("{0}")]
    Io(String),
}

impl ClientError {
    /// Map a raw errno (positive value) to an error kind.
    ///
    /// Unknown values become [`ClientError::Io`] with the system's
    /// message for the code.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ENOENT => Self::NotFound,
            libc::ENOTEMPTY => Self::NotEmpty,
            libc::EACCES | libc::EPERM => Self::AccessDenied,
            libc::EISDIR => Self::IsDirectory,
            libc::ENOTDIR => Self::NotADirectory,
            libc::EEXIST => Self::AlreadyExists,
            _ => Self::Io(std::io::Error::from_raw_os_error(errno).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert!(matches!(
            ClientError::from_errno(libc::ENOENT),
            ClientError::NotFound
        ));
        assert!(matches!(
            ClientError::from_errno(libc::ENOTEMPTY),
            ClientError::NotEmpty
        ));
        assert!(matches!(
            ClientError::from_errno(libc::EACCES),
            ClientError::AccessDenied
        ));
    }

    #[test]
    fn test_unknown_errno_keeps_message() {
        let err = ClientError::from_errno(libc::EIO);
        assert!(matches!(err, ClientError::Io(_)));
    }
}
