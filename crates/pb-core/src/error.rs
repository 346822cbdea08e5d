use prost::bytes::Bytes;
use tonic::{Code, Status};

use crate::types::ToolResult;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Carries a result the caller can hand straight back to the model.
    #[error("already exists: {message}")]
    AlreadyExists {
        message: String,
        tool_result: Option<Box<ToolResult>>,
    },

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn code(&self) -> Code {
        match self {
            Error::InvalidArgument(_) => Code::InvalidArgument,
            Error::NotFound(_) => Code::NotFound,
            Error::AlreadyExists { .. } => Code::AlreadyExists,
            Error::FailedPrecondition(_) => Code::FailedPrecondition,
            Error::Unavailable(_) => Code::Unavailable,
            Error::DeadlineExceeded(_) => Code::DeadlineExceeded,
            Error::Io(_) | Error::Decode(_) | Error::Json(_) | Error::Internal(_) => Code::Internal,
        }
    }

    /// The recoverable tool result attached to an `AlreadyExists` error.
    pub fn tool_result(&self) -> Option<&ToolResult> {
        match self {
            Error::AlreadyExists { tool_result, .. } => tool_result.as_deref(),
            _ => None,
        }
    }

    /// The message without the status prefix.
    pub fn message(&self) -> String {
        match self {
            Error::InvalidArgument(m)
            | Error::NotFound(m)
            | Error::FailedPrecondition(m)
            | Error::Unavailable(m)
            | Error::DeadlineExceeded(m)
            | Error::Internal(m) => m.clone(),
            Error::AlreadyExists { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let code = err.code();
        match err.tool_result() {
            Some(result) => match serde_json::to_vec(result) {
                Ok(details) => Status::with_details(code, err.message(), Bytes::from(details)),
                Err(_) => Status::new(code, err.message()),
            },
            None => Status::new(code, err.message()),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::InvalidArgument | Code::OutOfRange => Error::InvalidArgument(message),
            Code::NotFound => Error::NotFound(message),
            Code::AlreadyExists => Error::AlreadyExists {
                message,
                tool_result: serde_json::from_slice::<ToolResult>(status.details())
                    .ok()
                    .map(Box::new),
            },
            Code::FailedPrecondition => Error::FailedPrecondition(message),
            Code::Unavailable => Error::Unavailable(message),
            Code::DeadlineExceeded | Code::Cancelled => Error::DeadlineExceeded(message),
            _ => Error::Internal(message),
        }
    }
}
