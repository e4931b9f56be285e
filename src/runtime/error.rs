//! Error types crossing the embedding boundary.
//!
//! Blocking collaborator work reports [`HostError`]; its classification is
//! what the interpreter sees when the async bridge re-raises it. Terminal
//! outcomes of a top-level evaluation are [`Error`].

use std::io;
use std::sync::Arc;

/// Error produced by blocking host work run through the async bridge.
///
/// The bridge converts this into an interpreter-raised error with a fixed
/// classification: missed deadlines become `"timeout"`, cancellation becomes
/// `"interrupted"`, anything else passes its message through verbatim.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("timeout")]
    DeadlineExceeded,
    #[error("interrupted")]
    Canceled,
    #[error("{0}")]
    Other(String),
}

impl HostError {
    pub fn other(message: impl Into<String>) -> HostError {
        HostError::Other(message.into())
    }

    /// Convert into the interpreter's raise mechanism. This is the only
    /// place collaborator errors turn into script-visible exceptions.
    pub(crate) fn into_lua(self) -> mlua::Error {
        mlua::Error::RuntimeError(self.to_string())
    }
}

impl From<io::Error> for HostError {
    fn from(err: io::Error) -> HostError {
        HostError::Other(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for HostError {
    fn from(_: tokio::time::error::Elapsed) -> HostError {
        HostError::DeadlineExceeded
    }
}

/// Terminal error of a top-level evaluation or of the marshalling layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The script raised or was aborted; `trace` carries the interpreter
    /// stack traceback when one was captured.
    #[error("{message}")]
    Script {
        message: String,
        trace: Option<String>,
    },
    /// Malformed or self-referential input to the value marshaller. Inputs
    /// are host-controlled, so this is a programming error, not a script
    /// failure.
    #[error("malformed value: {0}")]
    Marshal(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Lua(mlua::Error),
}

impl Error {
    /// Fold an interpreter error into the script/trace shape. mlua appends
    /// the traceback to runtime error messages and wraps callback failures;
    /// both are unwrapped here so `message` stays the raised text alone.
    pub(crate) fn from_lua(err: mlua::Error) -> Error {
        match err {
            mlua::Error::CallbackError { traceback, cause } => {
                match Error::from_lua(unwrap_cause(cause)) {
                    Error::Script {
                        message,
                        trace: None,
                    } => Error::Script {
                        message,
                        trace: Some(traceback),
                    },
                    other => other,
                }
            }
            mlua::Error::RuntimeError(text) => split_traceback(text),
            mlua::Error::SyntaxError { message, .. } => Error::Script {
                message,
                trace: None,
            },
            mlua::Error::MemoryError(text) => Error::Script {
                message: text,
                trace: None,
            },
            other => Error::Lua(other),
        }
    }
}

fn unwrap_cause(cause: Arc<mlua::Error>) -> mlua::Error {
    Arc::try_unwrap(cause).unwrap_or_else(|shared| (*shared).clone())
}

fn split_traceback(text: String) -> Error {
    match text.split_once("\nstack traceback:") {
        Some((message, rest)) => Error::Script {
            message: message.trim_end().to_string(),
            trace: Some(format!("stack traceback:{rest}")),
        },
        None => Error::Script {
            message: text,
            trace: None,
        },
    }
}
