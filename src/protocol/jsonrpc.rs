//! JSON-RPC 2.0 message framing
//!
//! Every payload crossing a frame boundary is one of four shapes. Parsing is
//! done by hand instead of `#[serde(untagged)]` so malformed input produces a
//! precise error for the channel's error callback.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

use crate::utils::{BridgeError, Result};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier (number or string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::from(s.clone()),
        }
    }
}

/// Error object carried by an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&BridgeError> for RpcErrorObject {
    fn from(err: &BridgeError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: None,
        }
    }
}

/// A single framed message
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: RequestId,
        result: Value,
    },
    Error {
        id: Option<RequestId>,
        error: RpcErrorObject,
    },
}

impl JsonRpcMessage {
    /// Create a request
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a notification
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// Method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            _ => None,
        }
    }

    /// Validate and decode an inbound payload
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(BridgeError::InvalidMessage("payload is not an object".into()));
        };

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(BridgeError::InvalidMessage(format!(
                    "unsupported jsonrpc version '{}'",
                    other
                )));
            }
            None => return Err(BridgeError::InvalidMessage("missing jsonrpc field".into())),
        }

        let id = match obj.get("id") {
            None => None,
            Some(raw) => Some(RequestId::from_value(raw).ok_or_else(|| {
                BridgeError::InvalidMessage("id must be a string or an integer".into())
            })?),
        };

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(BridgeError::InvalidMessage("method must be a string".into()));
            };
            let params = take_params(&mut obj)?;
            return Ok(match id {
                Some(id) => Self::Request { id, method, params },
                None => Self::Notification { method, params },
            });
        }

        match (obj.remove("result"), obj.remove("error")) {
            (Some(result), None) => {
                let id = id.ok_or_else(|| BridgeError::InvalidMessage("response without id".into()))?;
                Ok(Self::Response { id, result })
            }
            (None, Some(error)) => {
                let error: RpcErrorObject = serde_json::from_value(error)
                    .map_err(|e| BridgeError::InvalidMessage(format!("malformed error object: {}", e)))?;
                Ok(Self::Error { id, error })
            }
            (Some(_), Some(_)) => Err(BridgeError::InvalidMessage(
                "response carries both result and error".into(),
            )),
            (None, None) => Err(BridgeError::InvalidMessage(
                "message has neither method nor result/error".into(),
            )),
        }
    }

    /// Encode for posting across a frame boundary
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match self {
            Self::Request { id, method, params } => {
                obj.insert("id".into(), id.to_value());
                obj.insert("method".into(), Value::from(method.as_str()));
                if let Some(params) = params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Notification { method, params } => {
                obj.insert("method".into(), Value::from(method.as_str()));
                if let Some(params) = params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Response { id, result } => {
                obj.insert("id".into(), id.to_value());
                obj.insert("result".into(), result.clone());
            }
            Self::Error { id, error } => {
                obj.insert(
                    "id".into(),
                    id.as_ref().map(RequestId::to_value).unwrap_or(Value::Null),
                );
                obj.insert("error".into(), json!(error));
            }
        }
        Value::Object(obj)
    }
}

fn take_params(obj: &mut Map<String, Value>) -> Result<Option<Value>> {
    match obj.remove("params") {
        None | Some(Value::Null) => Ok(None),
        Some(params @ (Value::Object(_) | Value::Array(_))) => Ok(Some(params)),
        Some(_) => Err(BridgeError::InvalidMessage(
            "params must be an object or an array".into(),
        )),
    }
}

/// Peek at the method of a raw payload without fully validating it
pub fn peek_method(value: &Value) -> Option<&str> {
    value.get("method").and_then(Value::as_str)
}
