use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MetaError {
    #[error("required group `{0}` is missing")]
    MissingGroup(String),

    #[error("group `{group}` is malformed: {reason}")]
    MalformedGroup { group: String, reason: String },

    #[error("unknown matrix storage format: {0}")]
    UnknownFormat(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("cannot open container {path}: {message}")]
    InvalidContainer { path: PathBuf, message: String },

    #[error("container read failed: {0}")]
    Container(String),

    #[error("invalid S3 URI: {0}")]
    #[diagnostic(help("expected s3://bucket/key or s3://bucket/prefix/"))]
    InvalidUri(String),

    #[error("remote access failed: {0}")]
    RemoteAccess(String),

    #[error("object store returned status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to write output: {0}")]
    Output(String),
}

impl From<hdf5::Error> for MetaError {
    fn from(err: hdf5::Error) -> Self {
        MetaError::Container(err.to_string())
    }
}
