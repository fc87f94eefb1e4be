//! Public error taxonomy
//!
//! The message strings here are the externally visible contract:
//! bindings surface them verbatim, and the reference harness asserts on
//! them. Session-layer failures ([`ClientError`]) are translated at the
//! operation boundary, where the entry name being worked on is known.

use cove_smb::ClientError;
use thiserror::Error;

/// Filesystem-layer result type
pub type Result<T> = std::result::Result<T, Error>;

/// Everything a handle operation can fail with
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// `getDirectoryHandle` target missing without `create`
    #[error("Directory {0:?} not found")]
    DirectoryNotFound(String),

    /// `getFileHandle` target missing without `create`, or the file was
    /// deleted out from under an operation
    #[error("File {0:?} not found")]
    FileNotFound(String),

    /// `removeEntry` target missing
    #[error("Entry {0:?} not found")]
    EntryNotFound(String),

    /// Non-recursive removal of a populated directory
    #[error("Directory {0:?} is not empty")]
    NotEmpty(String),

    /// An entry exists at the path but has the other kind
    #[error("The path supplied exists, but was not an entry of requested type.")]
    TypeMismatch,

    /// A child name that is not a single well-formed path segment
    #[error("Invalid name {0:?}")]
    InvalidName(String),

    /// The connection URL could not be parsed
    #[error("{0}")]
    InvalidUrl(String),

    /// The requested authentication mode lacks required inputs
    #[error("{0}")]
    InvalidAuth(String),

    /// An operation on a closed, aborted, or locked stream
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// A write input that is not bytes, text, or a structured command
    #[error("Writing unsupported type")]
    UnsupportedType,

    /// A structured write whose payload is missing or unusable
    #[error("Writing unsupported data type")]
    UnsupportedDataType,

    /// The server's ACL denied the operation
    #[error("permission denied")]
    PermissionDenied,

    /// The session could not be established
    #[error("{0}")]
    ConnectFailed(String),

    /// Backend failure, message carried verbatim
    #[error("{0}")]
    Io(String),

    /// The caller abandoned the operation before completion
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Stream-state error: the stream has a writer attached.
    pub(crate) fn stream_locked() -> Self {
        Self::InvalidState("WritableStream is locked")
    }

    /// Stream-state error: the stream was closed or aborted.
    pub(crate) fn stream_closed() -> Self {
        Self::InvalidState("WritableStream is closed")
    }
}

/// What the failing operation was addressing, for `NotFound` wording.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NameContext<'a> {
    /// Expecting a directory with this name
    Directory(&'a str),
    /// Expecting a file with this name
    File(&'a str),
    /// Expecting an entry of either kind
    Entry(&'a str),
}

/// Translate a session error, attaching name context.
pub(crate) fn client_error(err: ClientError, context: NameContext<'_>) -> Error {
    match err {
        ClientError::NotFound => match context {
            NameContext::Directory(name) => Error::DirectoryNotFound(name.to_string()),
            NameContext::File(name) => Error::FileNotFound(name.to_string()),
            NameContext::Entry(name) => Error::EntryNotFound(name.to_string()),
        },
        ClientError::NotEmpty => {
            let (NameContext::Directory(name)
            | NameContext::File(name)
            | NameContext::Entry(name)) = context;
            Error::NotEmpty(name.to_string())
        }
        ClientError::IsDirectory | ClientError::NotADirectory => Error::TypeMismatch,
        ClientError::AccessDenied => Error::PermissionDenied,
        ClientError::InvalidUrl { .. } => Error::InvalidUrl(err.to_string()),
        ClientError::InvalidAuth(msg) => Error::InvalidAuth(msg),
        ClientError::ConnectFailed(msg) => Error::ConnectFailed(msg),
        ClientError::Cancelled => Error::Cancelled,
        ClientError::AlreadyExists | ClientError::ContextClosed | ClientError::Io(_) => {
            Error::Io(err.to_string())
        }
    }
}
