//! JSON-RPC 2.0 envelopes shared by the HTTP and WebSocket transports.

use compact_streamer::StreamerError;
use serde::Deserialize;
use serde_json::{json, Value};

/// `-32700`: body is not JSON.
pub const PARSE_ERROR: i32 = -32700;
/// `-32600`: JSON is not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;

/// One JSON-RPC request.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Request id, echoed in every response frame.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Method parameters; absent means `null`.
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Decode and validate a request object.
    ///
    /// Notifications (null id) are not supported.
    pub fn from_value(value: Value) -> Result<Self, Value> {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: RpcRequest = serde_json::from_value(value)
            .map_err(|e| failure(&id, INVALID_REQUEST, &format!("Invalid Request: {}", e)))?;

        match &request.id {
            Value::Null => Err(failure(
                &Value::Null,
                INVALID_REQUEST,
                "Invalid Request: null id (notifications not supported)",
            )),
            Value::String(s) if s.is_empty() || s.len() > 256 => Err(failure(
                &Value::Null,
                INVALID_REQUEST,
                "Invalid Request: id string must be 1..=256 chars",
            )),
            Value::String(_) | Value::Number(_) => Ok(request),
            _ => Err(failure(
                &Value::Null,
                INVALID_REQUEST,
                "Invalid Request: id must be string or number",
            )),
        }
    }
}

/// Successful response.
pub fn success(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

/// Error response with a bare code and message.
pub fn failure(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

/// Error response for a core error, tagged with its kind.
pub fn error_response(id: &Value, err: &StreamerError) -> Value {
    let mut data = json!({ "kind": err.kind() });
    if let StreamerError::Reorganized { height } = err {
        data["height"] = json!(height);
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": err.error_code(),
            "message": err.to_string(),
            "data": data
        }
    })
}

/// Final frame of a stream that ran to completion.
pub fn stream_done(id: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "done": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use compact_streamer::codes;

    #[test]
    fn test_valid_request() {
        let request =
            RpcRequest::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "GetLightdInfo"}))
                .unwrap();
        assert_eq!(request.method, "GetLightdInfo");
        assert!(request.params.is_null());
    }

    #[test]
    fn test_null_id_rejected() {
        let err = RpcRequest::from_value(json!({"id": null, "method": "GetBlock"})).unwrap_err();
        assert_eq!(err["error"]["code"], INVALID_REQUEST);
    }

    #[test]
    fn test_object_id_rejected() {
        let err = RpcRequest::from_value(json!({"id": {"a": 1}, "method": "GetBlock"})).unwrap_err();
        assert_eq!(err["error"]["code"], INVALID_REQUEST);
    }

    #[test]
    fn test_missing_method_keeps_id() {
        let err = RpcRequest::from_value(json!({"id": 9})).unwrap_err();
        assert_eq!(err["id"], 9);
        assert_eq!(err["error"]["code"], INVALID_REQUEST);
    }

    #[test]
    fn test_reorg_error_carries_height() {
        let frame = error_response(&json!(3), &StreamerError::Reorganized { height: 103 });
        assert_eq!(frame["error"]["code"], codes::REORGANIZED);
        assert_eq!(frame["error"]["data"]["kind"], "reorganized");
        assert_eq!(frame["error"]["data"]["height"], 103);
    }
}
