use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, XmlError>;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("Failed to open file {}: {}", path.display(), source)]
    FailedToOpenFile { source: io::Error, path: PathBuf },

    #[error("File {} contains no data", path.display())]
    EmptyFile { path: PathBuf },

    #[error("An I/O error has occurred: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Every charset candidate was tried and the document still did not parse.
    /// `source` is the structural error reported by the final raw-bytes attempt.
    #[error("No charset candidate produced a well-formed document (tried: {tried}): {source}")]
    ExhaustedCharsets { tried: String, source: ParseError },

    #[error("Writing to XML failed with: {message}")]
    XmlOutputError { message: String },

    #[error("Document has no content to save")]
    NothingToSave,
}

/// Structural parse failure, positioned at a byte offset into the text that
/// was handed to the parser (after any charset conversion).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Offset {offset}: {message}")]
pub struct ParseError {
    pub offset: u64,
    pub message: String,
}

impl ParseError {
    pub fn new(offset: u64, message: impl Into<String>) -> Self {
        ParseError {
            offset,
            message: message.into(),
        }
    }
}

/// Charset conversion failure. Recovered internally while walking the
/// candidate chain, surfaced only through debug logs or [`XmlError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to convert data from {charset}: {message}")]
pub struct ConversionError {
    pub charset: String,
    pub message: String,
}

impl ConversionError {
    pub fn new(charset: impl Into<String>, message: impl Into<String>) -> Self {
        ConversionError {
            charset: charset.into(),
            message: message.into(),
        }
    }
}
