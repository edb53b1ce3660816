//! JSON-RPC envelope encoding and decoding.
//!
//! The wire format is one compact JSON object per line:
//!
//! | Shape                             | Envelope                    |
//! |-----------------------------------|-----------------------------|
//! | `{method, id, params}`            | [`Envelope::Request`]       |
//! | `{method, params}`                | [`Envelope::Notification`]  |
//! | `{id, result}`                    | [`Envelope::Response`] `Ok` |
//! | `{id, error: {code, message}}`    | [`Envelope::Response`] `Err`|
//!
//! Unknown fields are ignored on decode so newer agents stay compatible.
//! `params` is omitted on encode when it is `null` and decodes back to
//! `null` when absent.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rpc::methods;
use crate::{AppError, Result};

/// JSON-RPC request identifier.
///
/// Ids assigned by this client are always [`RequestId::Integer`]; ids on
/// agent-originated requests are echoed back in whatever form they arrived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Integer(i64),
    /// String id.
    String(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// JSON-RPC error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<RpcErrorObject> for AppError {
    fn from(err: RpcErrorObject) -> Self {
        Self::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

/// Outcome carried by a response: the `result` value or the `error` object.
pub type ResponseOutcome = std::result::Result<Value, RpcErrorObject>;

/// One JSON-RPC unit on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A request expecting a response with the same id.
    Request {
        /// Method name.
        method: String,
        /// Correlation id.
        id: RequestId,
        /// Method parameters.
        params: Value,
    },
    /// A fire-and-forget message.
    Notification {
        /// Method name.
        method: String,
        /// Method parameters.
        params: Value,
    },
    /// The answer to an earlier request.
    Response {
        /// Id of the request being answered.
        id: RequestId,
        /// Result or error.
        outcome: ResponseOutcome,
    },
}

impl Envelope {
    /// Serialise the envelope as a single line without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MalformedEnvelope`] if serialisation fails.
    pub fn encode(&self) -> Result<String> {
        let mut obj = Map::new();
        match self {
            Self::Request { method, id, params } => {
                obj.insert("id".into(), serde_json::to_value(id)?);
                obj.insert("method".into(), Value::String(method.clone()));
                insert_params(&mut obj, params);
            }
            Self::Notification { method, params } => {
                obj.insert("method".into(), Value::String(method.clone()));
                insert_params(&mut obj, params);
            }
            Self::Response { id, outcome } => {
                obj.insert("id".into(), serde_json::to_value(id)?);
                match outcome {
                    Ok(result) => obj.insert("result".into(), result.clone()),
                    Err(error) => obj.insert("error".into(), serde_json::to_value(error)?),
                };
            }
        }

        let line = serde_json::to_string(&Value::Object(obj))?;
        // Compact serde_json output escapes every control character.
        debug_assert!(!line.contains('\n'), "encoded envelope contains a newline");
        Ok(line)
    }

    /// Parse one inbound line.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MalformedEnvelope`] when the line is not a JSON
    /// object, when `method` is not a string, when `id` is neither a number
    /// nor a string, when a response carries neither `result` nor `error`,
    /// or when there is no `method` and no `id`.
    pub fn decode(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| AppError::MalformedEnvelope(format!("invalid json: {e}")))?;
        let Value::Object(mut obj) = value else {
            return Err(AppError::MalformedEnvelope(
                "envelope is not a json object".into(),
            ));
        };

        let method = match obj.remove("method") {
            None | Some(Value::Null) => None,
            Some(Value::String(method)) => Some(method),
            Some(other) => {
                return Err(AppError::MalformedEnvelope(format!(
                    "method must be a string, got {other}"
                )))
            }
        };
        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<RequestId>(raw).map_err(|e| {
                AppError::MalformedEnvelope(format!("id must be a number or string: {e}"))
            })?),
        };
        let params = obj.remove("params").unwrap_or(Value::Null);

        match (method, id) {
            (Some(method), Some(id)) => Ok(Self::Request { method, id, params }),
            (Some(method), None) => Ok(Self::Notification { method, params }),
            (None, Some(id)) => {
                let outcome = match (obj.remove("error"), obj.remove("result")) {
                    (Some(error), _) if !error.is_null() => {
                        let error: RpcErrorObject = serde_json::from_value(error).map_err(|e| {
                            AppError::MalformedEnvelope(format!("invalid error object: {e}"))
                        })?;
                        Err(error)
                    }
                    (_, Some(result)) => Ok(result),
                    _ => {
                        return Err(AppError::MalformedEnvelope(format!(
                            "response {id} carries neither result nor error"
                        )))
                    }
                };
                Ok(Self::Response { id, outcome })
            }
            (None, None) => Err(AppError::MalformedEnvelope(
                "missing method field".into(),
            )),
        }
    }
}

/// Encode a request (`id` present) or notification (`id` absent) line.
///
/// # Errors
///
/// Returns [`AppError::MalformedEnvelope`] if serialisation fails.
pub fn encode(method: &str, params: Value, id: Option<RequestId>) -> Result<String> {
    let envelope = match id {
        Some(id) => Envelope::Request {
            method: method.to_owned(),
            id,
            params,
        },
        None => Envelope::Notification {
            method: method.to_owned(),
            params,
        },
    };
    envelope.encode()
}

/// Inbound message destined for the notification pump.
///
/// Plain notifications have no id. Agent-originated requests (approval
/// requests) keep theirs so the pump can answer on the same channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Id of an agent-originated request, if any.
    pub id: Option<RequestId>,
    /// Method parameters.
    pub params: Value,
}

impl Notification {
    /// Whether the agent expects a response to this message.
    #[must_use]
    pub fn expects_response(&self) -> bool {
        self.id.is_some()
    }

    /// Whether this message belongs to the approval-request family.
    #[must_use]
    pub fn is_approval_request(&self) -> bool {
        methods::is_approval_request(&self.method)
    }
}

fn insert_params(obj: &mut Map<String, Value>, params: &Value) {
    if !params.is_null() {
        obj.insert("params".into(), params.clone());
    }
}
