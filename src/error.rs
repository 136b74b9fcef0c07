//! Handler error taxonomy
//!
//! Every failure is surfaced to the client as-is; this module only decides the
//! status code.

use hyper::StatusCode;
use thiserror::Error;

/// Error type of request bodies the handlers can consume
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

use crate::exec::ExecError;
use crate::reconstruct::ReconstructError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("missing query parameter '{0}'")]
    MissingParam(&'static str),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),

    #[error("bad request: no '{0}' file part in upload")]
    MissingFile(&'static str),

    #[error("bad request: {0}")]
    Multipart(#[from] multer::Error),

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("request body exceeds {0} bytes")]
    TooLarge(u64),

    #[error("failed to write upload: {0}")]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingFile(_) | Self::Multipart(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MissingParam(_)
            | Self::Exec(_)
            | Self::Reconstruct(_)
            | Self::Body(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
