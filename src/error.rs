use thiserror::Error;

use crate::classify::ClassifiedError;

/// Why a log file was refused before any request was made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no file selected")]
    NoFile,
    #[error("only one log file can be uploaded at a time ({0} given)")]
    MultipleFiles(usize),
    #[error("please upload a .bin file ({0} is not one)")]
    WrongExtension(String),
    #[error("{name} is {size} bytes, the limit is {limit} bytes")]
    TooLarge { name: String, size: u64, limit: u64 },
}

/// A request that did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestFailure {
    /// The request never got an HTTP response back (refused, reset, DNS, timeout).
    #[error("no response from backend: {0}")]
    NoResponse(String),
    #[error("backend returned HTTP {status}")]
    Status { status: u16, body: String },
    /// A 2xx response whose body could not be read as the expected shape.
    #[error("unreadable backend response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("an upload is already in progress")]
    Busy,
    #[error("failed to read {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Request(ClassifiedError),
}
