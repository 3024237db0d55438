use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};

/// The literal carried in every envelope's `jsonrpc` field.
pub const VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// Code used for handler failures that don't carry their own code.
pub const DEFAULT_APPLICATION_CODE: i64 = 1;

/// Correlation identifier of a request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Returns the id as a locally allocated call number, if it is one.
    #[must_use]
    pub fn as_call_id(&self) -> Option<u64> {
        match self {
            RequestId::Number(n) => u64::try_from(*n).ok(),
            RequestId::String(_) => None,
        }
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        // call ids never come close to i64::MAX within one connection.
        RequestId::Number(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s:?}"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Request {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    pub params: Vec<Value>,
}

impl Request {
    #[must_use]
    pub fn new(id: Option<RequestId>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// A request without `id` expects no response.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    #[must_use]
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn error(id: Option<RequestId>, err: &Error) -> Self {
        Self {
            jsonrpc: VERSION,
            id,
            result: None,
            error: Some(err.to_object()),
        }
    }

    #[must_use]
    pub fn from_result(id: Option<RequestId>, result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(err) => Self::error(id, &err),
        }
    }

    /// Converts the envelope back into the callee's outcome.
    ///
    /// # Errors
    ///
    /// Returns the error object carried by the response, mapped to its kind.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(object) => Err(object.into()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Loosely typed envelope, classified into a [`Frame`] after parsing.
#[derive(Deserialize, Debug, Default)]
struct RawFrame {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

/// A frame that parsed as JSON but is not a valid envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidFrame {
    pub id: Option<RequestId>,
    pub error: Error,
}

impl InvalidFrame {
    fn new(id: Option<RequestId>, kind: ErrorKind, msg: String) -> Self {
        Self {
            id,
            error: Error::new(kind, msg),
        }
    }

    #[must_use]
    pub fn into_response(self) -> Response {
        Response::error(self.id, &self.error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(Request),
    Response(Response),
    Invalid(InvalidFrame),
}

impl Frame {
    /// Parses one envelope. JSON that is not an envelope becomes an
    /// invalid frame.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if the bytes are not JSON.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::new(ErrorKind::ParseError, e.to_string()))?;
        Ok(Self::from_value(value))
    }

    fn from_value(value: Value) -> Self {
        match serde_json::from_value::<RawFrame>(value) {
            Ok(raw) => Self::classify(raw),
            Err(e) => Frame::Invalid(InvalidFrame::new(
                None,
                ErrorKind::InvalidRequest,
                e.to_string(),
            )),
        }
    }

    fn classify(raw: RawFrame) -> Self {
        let id = match raw.id {
            None | Some(Value::Null) => None,
            Some(value) => match serde_json::from_value::<RequestId>(value) {
                Ok(id) => Some(id),
                Err(_) => {
                    return Frame::Invalid(InvalidFrame::new(
                        None,
                        ErrorKind::InvalidRequest,
                        "id must be a number or a string".into(),
                    ));
                }
            },
        };

        if raw.jsonrpc.as_deref() != Some(VERSION) {
            return Frame::Invalid(InvalidFrame::new(
                id,
                ErrorKind::InvalidRequest,
                format!("unsupported jsonrpc version: {:?}", raw.jsonrpc),
            ));
        }

        let Some(method) = raw.method else {
            return Frame::Response(Response {
                jsonrpc: VERSION,
                id,
                result: match raw.error {
                    Some(_) => None,
                    None => Some(raw.result.unwrap_or(Value::Null)),
                },
                error: raw.error,
            });
        };

        let params = match raw.params {
            None | Some(Value::Null) => vec![],
            Some(Value::Array(params)) => params,
            Some(_) => {
                return Frame::Invalid(InvalidFrame::new(
                    id,
                    ErrorKind::InvalidRequest,
                    "params must be an array".into(),
                ));
            }
        };
        Frame::Request(Request::new(id, method, params))
    }
}

/// The body of a unary call: one envelope or a batch of them.
#[derive(Debug)]
pub enum Body {
    Single(Frame),
    Batch(Vec<Frame>),
}

impl Body {
    /// # Errors
    ///
    /// Returns a `ParseError` if the body is not JSON, and an
    /// `InvalidRequest` for an empty batch.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let is_batch = bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'[');
        if !is_batch {
            return Frame::parse(bytes).map(Body::Single);
        }

        let values: Vec<Value> = serde_json::from_slice(bytes)
            .map_err(|e| Error::new(ErrorKind::ParseError, e.to_string()))?;
        if values.is_empty() {
            return Err(Error::new(ErrorKind::InvalidRequest, "empty batch".into()));
        }
        Ok(Body::Batch(values.into_iter().map(Frame::from_value).collect()))
    }
}
