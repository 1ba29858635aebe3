//! Wire protocol between client sessions and the server router.
//!
//! Messages are bincode-encoded and carried in binary WebSocket frames:
//! ```text
//! client ──► server   Request  { type, id, token, path?, value? }
//! server ──► client   Response::Value   { id, value }
//!                     Response::Success { id }
//!                     Response::Error   { id?, error }
//! ```
//!
//! The request `type` travels as text so that unknown kinds survive
//! decoding and can be answered with an explicit error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{Document, Path, Value};

pub const GET_DATA: &str = "getData";
pub const PUT: &str = "put";
pub const DELETE: &str = "delete";

/// Error text for requests whose token does not match.
pub const UNAUTHORIZED: &str = "Unauthorized";
/// Error text for unrecognized request kinds.
pub const UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Unknown message type")]
    UnknownMessageType(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// A client request as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Operation kind: `getData`, `put` or `delete`
    pub msg_type: String,
    /// Correlation id, unique while the request is outstanding
    pub id: Option<u64>,
    /// Shared secret presented to the server
    pub token: String,
    pub path: Option<Path>,
    pub value: Option<Value>,
}

impl Request {
    /// Typed view of this request.
    pub fn operation(&self) -> Result<Operation, ProtocolError> {
        match self.msg_type.as_str() {
            GET_DATA => Ok(Operation::GetData),
            PUT => Ok(Operation::Put {
                path: self.path.clone().ok_or(ProtocolError::MissingField("path"))?,
                value: self.value.clone().unwrap_or(Value::Null),
            }),
            DELETE => Ok(Operation::Delete {
                path: self.path.clone().ok_or(ProtocolError::MissingField("path"))?,
            }),
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (req, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(req)
    }
}

/// An operation a client can ask the server to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Fetch the full document
    GetData,
    /// Assign a value at a path
    Put { path: Path, value: Value },
    /// Remove the value at a path
    Delete { path: Path },
}

impl Operation {
    /// Wire name of this operation.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::GetData => GET_DATA,
            Operation::Put { .. } => PUT,
            Operation::Delete { .. } => DELETE,
        }
    }

    /// Attach an id and token, producing the wire request.
    pub fn into_request(self, id: u64, token: impl Into<String>) -> Request {
        let msg_type = self.kind().to_string();
        let (path, value) = match self {
            Operation::GetData => (None, None),
            Operation::Put { path, value } => (Some(path), Some(value)),
            Operation::Delete { path } => (Some(path), None),
        };
        Request {
            msg_type,
            id: Some(id),
            token: token.into(),
            path,
            value,
        }
    }
}

/// A server reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Reply to `getData`
    Value { id: Option<u64>, value: Document },
    /// Reply to an applied `put` / `delete`
    Success { id: Option<u64> },
    /// Request was rejected or failed
    Error { id: Option<u64>, error: String },
}

impl Response {
    pub fn error(id: Option<u64>, error: impl Into<String>) -> Self {
        Response::Error {
            id,
            error: error.into(),
        }
    }

    /// Correlation id this reply answers, if any.
    pub fn id(&self) -> Option<u64> {
        match self {
            Response::Value { id, .. } | Response::Success { id } | Response::Error { id, .. } => {
                *id
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (resp, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::path;

    #[test]
    fn test_put_request_carries_path_and_value() {
        let op = Operation::Put {
            path: path(&["array", "key"]),
            value: Value::from("nested_value"),
        };
        let req = op.clone().into_request(3, "secret");
        assert_eq!(req.msg_type, "put");
        assert_eq!(req.id, Some(3));
        assert_eq!(req.token, "secret");

        let decoded = Request::decode(&req.encode().unwrap()).unwrap();
        assert_eq!(decoded.operation().unwrap(), op);
    }

    #[test]
    fn test_get_data_has_no_path() {
        let req = Operation::GetData.into_request(1, "t");
        assert_eq!(req.msg_type, "getData");
        assert!(req.path.is_none());
        assert!(req.value.is_none());
    }

    #[test]
    fn test_unknown_kind_survives_decoding() {
        let req = Request {
            msg_type: "explode".into(),
            id: Some(9),
            token: "t".into(),
            path: None,
            value: None,
        };
        let decoded = Request::decode(&req.encode().unwrap()).unwrap();
        assert_eq!(
            decoded.operation(),
            Err(ProtocolError::UnknownMessageType("explode".into()))
        );
    }

    #[test]
    fn test_delete_without_path_rejected() {
        let req = Request {
            msg_type: DELETE.into(),
            id: Some(1),
            token: "t".into(),
            path: None,
            value: None,
        };
        assert_eq!(req.operation(), Err(ProtocolError::MissingField("path")));
    }

    #[test]
    fn test_response_ids() {
        assert_eq!(Response::Success { id: Some(4) }.id(), Some(4));
        assert_eq!(Response::error(None, "x").id(), None);
        assert!(Response::error(Some(1), UNAUTHORIZED).is_error());
    }

    #[test]
    fn test_value_response_keeps_nesting() {
        let mut doc = Document::new();
        crate::engine::put(&mut doc, &path(&["a", "b", "c"]), Value::Int(1)).unwrap();
        let resp = Response::Value {
            id: Some(1),
            value: doc.clone(),
        };
        let decoded = Response::decode(&resp.encode().unwrap()).unwrap();
        assert_eq!(decoded, Response::Value { id: Some(1), value: doc });
    }

    #[test]
    fn test_decode_invalid_bytes() {
        assert!(Request::decode(&[0xFF, 0xFE, 0xFD]).is_err());
        assert!(Response::decode(&[0xFF, 0xFE, 0xFD]).is_err());
    }
}
