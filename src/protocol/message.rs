//! Incoming message types.
//!
//! Every text frame from the server is classified into one
//! [`ServerMessage`] variant. Classification is by shape, since the protocol
//! carries no single discriminator field:
//!
//! | Shape | Variant |
//! |-------|---------|
//! | `{"id", "success", ...}` | [`ServerMessage::Response`] |
//! | `{"id", "success", ...}` with mistyped fields | [`ServerMessage::MalformedResponse`] |
//! | `{"event_type": "event", "event", "payload"}` | [`ServerMessage::Event`] |
//! | `{"pong": true}` | [`ServerMessage::Pong`] |
//! | `{"ping": true}` | [`ServerMessage::Ping`] |
//! | `{"auth": "ok"}` | [`ServerMessage::AuthOk`] |
//! | `{"error": "..."}` | [`ServerMessage::AuthRejected`] |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use crate::codec;
use crate::error::{Error, Result};

// ============================================================================
// ServerMessage
// ============================================================================

/// A classified frame received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Response to a correlated request.
    Response(Response),
    /// Response-shaped frame whose fields have the wrong types.
    MalformedResponse {
        /// Request id, read leniently from a string or number.
        id: String,
        /// Why the frame was rejected.
        reason: String,
    },
    /// Server-pushed event.
    Event(EventFrame),
    /// Keepalive echo; dropped by the client.
    Pong,
    /// Server-initiated keepalive; answered with a pong.
    Ping,
    /// Auth handshake accepted.
    AuthOk,
    /// Auth handshake (or connection) rejected with a message.
    AuthRejected(String),
    /// Valid JSON with no recognizable shape.
    Unknown(Value),
}

impl ServerMessage {
    /// Parses and classifies a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the frame is not JSON, or an event frame has
    ///   fields of the wrong type
    /// - [`Error::Protocol`] if a response-shaped frame has no usable id
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::classify(value)
    }

    fn classify(value: Value) -> Result<Self> {
        if let Some(id) = value.get("id")
            && value.get("success").is_some()
        {
            return match Response::deserialize(&value) {
                Ok(response) => Ok(Self::Response(response)),
                Err(e) => {
                    let id = match id {
                        Value::String(id) => id.clone(),
                        Value::Number(id) => id.to_string(),
                        _ => {
                            return Err(Error::protocol(format!("Response with invalid id: {e}")));
                        }
                    };
                    Ok(Self::MalformedResponse {
                        id,
                        reason: e.to_string(),
                    })
                }
            };
        }

        if value.get("event_type").and_then(Value::as_str) == Some("event") {
            return Ok(Self::Event(serde_json::from_value(value)?));
        }

        if value.get("pong").and_then(Value::as_bool) == Some(true) {
            return Ok(Self::Pong);
        }

        if value.get("ping").and_then(Value::as_bool) == Some(true) {
            return Ok(Self::Ping);
        }

        if value.get("auth").and_then(Value::as_str) == Some("ok") {
            return Ok(Self::AuthOk);
        }

        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return Ok(Self::AuthRejected(message.to_string()));
        }

        Ok(Self::Unknown(value))
    }
}

// ============================================================================
// Response
// ============================================================================

/// A response correlated to a request by `id`.
///
/// # Format
///
/// Success:
/// ```json
/// { "id": "17", "success": true, "data": { ... }, "compressed": false }
/// ```
///
/// Error:
/// ```json
/// { "id": "17", "success": false, "error": "message" }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    /// Echo of the request id. Kept as text so unknown ids can be logged.
    pub id: String,

    /// Whether the command succeeded.
    pub success: bool,

    /// Result data; base64 gzip text when `compressed`.
    #[serde(default)]
    pub data: Option<Value>,

    /// Error message (if failed).
    #[serde(default)]
    pub error: Option<String>,

    /// Whether `data` is gzip+base64 encoded.
    #[serde(default)]
    pub compressed: bool,
}

impl Response {
    /// Converts the response into the caller's result.
    ///
    /// Compressed data is decoded first. A decode failure is logged and the
    /// raw (still encoded) data is passed through, so one malformed response
    /// never takes down the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] if `success` is false.
    pub fn into_result(self, command: &str) -> Result<Value> {
        if !self.success {
            let message = self.error.unwrap_or_else(|| "Unknown error".to_string());
            return Err(Error::command_failed(command, message));
        }

        let data = self.data.unwrap_or(Value::Null);
        if !self.compressed {
            return Ok(data);
        }

        match data.as_str().map(codec::decode_payload) {
            Some(Ok(decoded)) => Ok(decoded),
            Some(Err(e)) => {
                error!(id = %self.id, command, error = %e, "Failed to decompress response data");
                Ok(data)
            }
            None => {
                error!(id = %self.id, command, "Compressed response data is not a string");
                Ok(data)
            }
        }
    }
}

// ============================================================================
// EventFrame
// ============================================================================

/// A server-pushed event.
///
/// # Format
///
/// ```json
/// { "event_type": "event", "event": "sessions-changed", "payload": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventFrame {
    /// Event name listeners subscribe to.
    pub event: String,

    /// Event data.
    #[serde(default)]
    pub payload: Value,
}

// ============================================================================
// HttpReply
// ============================================================================

/// Body returned by `POST <base>/api`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HttpReply {
    /// Whether the command succeeded.
    pub success: bool,

    /// Result data (if success).
    #[serde(default)]
    pub data: Option<Value>,

    /// Error message (if failed).
    #[serde(default)]
    pub error: Option<String>,
}

impl HttpReply {
    /// Extracts the data value, returning an error if the command failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] if `success` is false.
    pub fn into_result(self, command: &str) -> Result<Value> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            let message = self.error.unwrap_or_else(|| "Unknown error".to_string());
            Err(Error::command_failed(command, message))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_success_response() {
        let message = ServerMessage::parse(r#"{"id":"5","success":true,"data":{"x":1}}"#)
            .expect("parse");

        let ServerMessage::Response(response) = message else {
            panic!("expected response, got {message:?}");
        };
        assert_eq!(response.id, "5");
        assert_eq!(response.into_result("echo").expect("ok"), json!({"x": 1}));
    }

    #[test]
    fn test_parse_failed_response() {
        let message =
            ServerMessage::parse(r#"{"id":"6","success":false,"error":"no such session"}"#)
                .expect("parse");

        let ServerMessage::Response(response) = message else {
            panic!("expected response");
        };
        let err = response.into_result("sessions.get").unwrap_err();
        assert!(
            matches!(err, Error::CommandFailed { ref message, .. } if message == "no such session")
        );
    }

    #[test]
    fn test_compressed_response_is_decoded() {
        let data = json!({"items": vec![1; 100]});
        let encoded = codec::encode_payload(&data).expect("encode");
        let frame = json!({"id": "7", "success": true, "data": encoded, "compressed": true});

        let ServerMessage::Response(response) =
            ServerMessage::parse(&frame.to_string()).expect("parse")
        else {
            panic!("expected response");
        };
        assert_eq!(response.into_result("list").expect("ok"), data);
    }

    #[test]
    fn test_malformed_compressed_response_passes_raw_data() {
        let frame = json!({"id": "8", "success": true, "data": "!!not-base64!!", "compressed": true});

        let ServerMessage::Response(response) =
            ServerMessage::parse(&frame.to_string()).expect("parse")
        else {
            panic!("expected response");
        };
        assert_eq!(
            response.into_result("list").expect("ok"),
            json!("!!not-base64!!")
        );
    }

    #[test]
    fn test_mistyped_response_keeps_its_id() {
        let message = ServerMessage::parse(r#"{"id":"9","success":false,"error":42}"#)
            .expect("parse");
        assert!(matches!(message, ServerMessage::MalformedResponse { ref id, .. } if id == "9"));

        let message = ServerMessage::parse(r#"{"id":10,"success":"yes"}"#).expect("parse");
        assert!(matches!(message, ServerMessage::MalformedResponse { ref id, .. } if id == "10"));

        let err = ServerMessage::parse(r#"{"id":null,"success":1}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_parse_event() {
        let message = ServerMessage::parse(
            r#"{"event_type":"event","event":"sessions-changed","payload":{"n":2}}"#,
        )
        .expect("parse");

        assert_eq!(
            message,
            ServerMessage::Event(EventFrame {
                event: "sessions-changed".into(),
                payload: json!({"n": 2}),
            })
        );
    }

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(
            ServerMessage::parse(r#"{"pong":true}"#).expect("parse"),
            ServerMessage::Pong
        );
        assert_eq!(
            ServerMessage::parse(r#"{"ping":true}"#).expect("parse"),
            ServerMessage::Ping
        );
        assert_eq!(
            ServerMessage::parse(r#"{"auth":"ok"}"#).expect("parse"),
            ServerMessage::AuthOk
        );
        assert_eq!(
            ServerMessage::parse(r#"{"error":"bad token"}"#).expect("parse"),
            ServerMessage::AuthRejected("bad token".into())
        );
    }

    #[test]
    fn test_parse_unknown_and_invalid() {
        assert!(matches!(
            ServerMessage::parse(r#"{"hello":"world"}"#).expect("parse"),
            ServerMessage::Unknown(_)
        ));
        assert!(ServerMessage::parse("not json").is_err());
    }

    #[test]
    fn test_http_reply() {
        let ok: HttpReply = serde_json::from_str(r#"{"success":true,"data":[1,2]}"#).expect("parse");
        assert_eq!(ok.into_result("list").expect("ok"), json!([1, 2]));

        let failed: HttpReply =
            serde_json::from_str(r#"{"success":false,"error":"denied"}"#).expect("parse");
        assert!(failed.into_result("list").unwrap_err().is_command_failure());

        let empty: HttpReply = serde_json::from_str(r#"{"success":true}"#).expect("parse");
        assert_eq!(empty.into_result("noop").expect("ok"), Value::Null);
    }
}
