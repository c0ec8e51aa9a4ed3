//! JSON-RPC 2.0 envelopes shared by the in-process, local-socket, HTTP and
//! WebSocket transports.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const SERVER_ERROR: i64 = -32000;

/// Separates a module namespace from the method name (`ping_info`)
pub const SERVICE_METHOD_SEPARATOR: char = '_';

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    /// Absent for notifications. An explicit `null` is a call with a null id.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Keeps a member that is present but `null` apart from a missing one
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>) -> Self {
        Request {
            jsonrpc: VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Splits `namespace_method` into its two halves
    pub fn service_method(&self) -> Option<(&str, &str)> {
        self.method
            .split_once(SERVICE_METHOD_SEPARATOR)
            .filter(|(service, method)| !service.is_empty() && !method.is_empty())
    }

    /// True when the call carries arguments (`[]`, `{}` and null count as none)
    pub fn has_params(&self) -> bool {
        match &self.params {
            None | Some(Value::Null) => false,
            Some(Value::Array(args)) => !args.is_empty(),
            Some(Value::Object(args)) => !args.is_empty(),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        ErrorObject {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(PARSE_ERROR, format!("parse error: {}", detail))
    }

    pub fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::new(INVALID_REQUEST, format!("invalid request: {}", detail))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            METHOD_NOT_FOUND,
            format!("the method {} does not exist/is not available", method),
        )
    }

    pub fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self::new(INVALID_PARAMS, format!("invalid params: {}", detail))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn result(id: Value, result: Value) -> Self {
        Response {
            jsonrpc: VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: ErrorObject) -> Self {
        Response {
            jsonrpc: VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Unwraps into the call's outcome
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A decoded request body: one call, or a batch of raw entries
#[derive(Debug)]
pub enum Incoming {
    Single(Value),
    Batch(Vec<Value>),
}

/// Parses a request body without validating the individual calls.
///
/// Entries of a batch are validated one by one so that a single malformed
/// entry only fails itself.
pub fn parse_incoming(text: &str) -> Result<Incoming, ErrorObject> {
    let value: Value = serde_json::from_str(text).map_err(ErrorObject::parse_error)?;
    match value {
        Value::Array(entries) if entries.is_empty() => {
            Err(ErrorObject::invalid_request("empty batch"))
        }
        Value::Array(entries) => Ok(Incoming::Batch(entries)),
        other => Ok(Incoming::Single(other)),
    }
}

/// Validates one call of a payload
pub fn parse_request(value: Value) -> Result<Request, ErrorObject> {
    let request: Request = serde_json::from_value(value).map_err(ErrorObject::invalid_request)?;
    if request.jsonrpc != VERSION {
        return Err(ErrorObject::invalid_request(format!(
            "unsupported version {:?}",
            request.jsonrpc
        )));
    }
    Ok(request)
}
