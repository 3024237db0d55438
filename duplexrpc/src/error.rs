use serde::{Deserialize, Serialize};

use crate::msg::{
    DEFAULT_APPLICATION_CODE, ErrorObject, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    /// Handler-raised error carrying a namespace-defined code.
    Application(i64),
    DuplicateMethod,
    UnknownAlias,
    Canceled,
    ConnectionClosed,
    KeepaliveTimeout,
    Timeout,
    Unauthorized,
    InvalidArgument,
    SerdeJsonError,
    TcpBindFailed,
    TcpConnectFailed,
    HttpBuildReqFailed,
    HttpSendReqFailed,
    HttpWaitRspFailed,
    HttpStatus(u16),
    HttpUpgradeFailed,
    WebSocketConnectFailed,
    WebSocketSendFailed,
    WebSocketRecvFailed,
    StreamSendFailed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self { kind, msg }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: String::default(),
        }
    }

    /// Application error with a handler-defined code.
    #[must_use]
    pub fn application(code: i64, msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Application(code), msg.into())
    }

    /// The JSON-RPC error code this error is reported with.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self.kind {
            ErrorKind::ParseError => PARSE_ERROR,
            ErrorKind::InvalidRequest => INVALID_REQUEST,
            ErrorKind::MethodNotFound => METHOD_NOT_FOUND,
            ErrorKind::InvalidParams => INVALID_PARAMS,
            ErrorKind::Application(code) => code,
            _ => DEFAULT_APPLICATION_CODE,
        }
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.kind == ErrorKind::Canceled
    }

    pub(crate) fn to_object(&self) -> ErrorObject {
        let message = match self.kind {
            // application errors travel verbatim.
            ErrorKind::Application(_) if !self.msg.is_empty() => self.msg.clone(),
            _ => self.to_string(),
        };
        ErrorObject {
            code: self.code(),
            message,
            data: None,
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

impl From<ErrorObject> for Error {
    fn from(value: ErrorObject) -> Self {
        let kind = match value.code {
            PARSE_ERROR => ErrorKind::ParseError,
            INVALID_REQUEST => ErrorKind::InvalidRequest,
            METHOD_NOT_FOUND => ErrorKind::MethodNotFound,
            INVALID_PARAMS => ErrorKind::InvalidParams,
            code => ErrorKind::Application(code),
        };
        Self::new(kind, value.message)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(value: std::num::TryFromIntError) -> Self {
        Self {
            kind: ErrorKind::InvalidArgument,
            msg: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self {
            kind: ErrorKind::SerdeJsonError,
            msg: value.to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
