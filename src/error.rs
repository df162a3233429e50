use crate::uri::Uri;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- transport errors ------------------------------------------
    #[error("transport closed")]
    TransportClosed,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    // --------------------------------- adapter errors --------------------------------------------
    #[error("adapter refused `{command}`: {message}")]
    Adapter { command: String, message: String },
    #[error("adapter type `{0}` is not registered")]
    UnknownAdapterType(String),
    #[error("adapter connect failed: {0}")]
    Connect(String),
    #[error("initialization did not complete within {0:?}")]
    InitializeTimeout(Duration),

    // --------------------------------- capability / state errors ---------------------------------
    #[error("adapter does not support `{0}`")]
    UnsupportedCapability(&'static str),
    #[error("{0} expired, execution has resumed since")]
    Expired(Uri),
    #[error("thread {0} is not stopped")]
    NotStopped(i64),
    #[error("session already terminated")]
    SessionTerminated,

    // --------------------------------- entity errors ---------------------------------------------
    #[error("entity not found: {0}")]
    EntityNotFound(String),
    #[error("invalid entity uri `{uri}`: {reason}")]
    UriParse { uri: String, reason: &'static str },
    #[error("shared fetch failed: {0}")]
    SharedFetch(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::transport::TransportError> for Error {
    fn from(err: crate::transport::TransportError) -> Self {
        match err {
            crate::transport::TransportError::Closed => Error::TransportClosed,
            crate::transport::TransportError::Malformed(message) => Error::MalformedFrame(message),
            crate::transport::TransportError::IO(err) => Error::IO(err),
        }
    }
}

impl Error {
    /// Return a hint to an embedder - continue with the session after this error or tear it down.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Adapter { .. } => false,
            Error::UnknownAdapterType(_) => false,
            Error::Connect(_) => false,
            Error::UnsupportedCapability(_) => false,
            Error::Expired(_) => false,
            Error::NotStopped(_) => false,
            Error::SessionTerminated => false,
            Error::EntityNotFound(_) => false,
            Error::UriParse { .. } => false,
            Error::SharedFetch(_) => false,
            Error::Json(_) => false,

            // currently fatal errors
            Error::TransportClosed => true,
            Error::MalformedFrame(_) => true,
            Error::IO(_) => true,
            Error::InitializeTimeout(_) => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "session", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "session", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
