//! Line-delimited JSON-RPC envelopes and error mapping.

use genq_contracts::config::ConfigError;
use genq_contracts::queue::QueueError;
use genq_contracts::tools::ToolCallError;
use genq_engine::GenerationError;
use serde_json::{json, Map, Value};

pub mod code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const OPERATION_FAILED: i64 = -32000;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcMethod {
    Initialize,
    ToolsList,
    ToolsCall,
    Initialized,
}

impl RpcMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "initialize" => Some(Self::Initialize),
            "tools/list" => Some(Self::ToolsList),
            "tools/call" => Some(Self::ToolsCall),
            "notifications/initialized" => Some(Self::Initialized),
            _ => None,
        }
    }
}

/// A decoded request line. `id` is `None` for notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    pub id: Option<Value>,
    pub method: String,
    pub params: Map<String, Value>,
}

impl Incoming {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub kind: Option<&'static str>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: None,
        }
    }

    fn to_value(&self) -> Value {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(kind) = self.kind {
            error["data"] = json!({ "kind": kind });
        }
        error
    }
}

impl From<&ToolCallError> for RpcError {
    fn from(err: &ToolCallError) -> Self {
        let code = match err {
            ToolCallError::UnknownTool(_) => code::METHOD_NOT_FOUND,
            ToolCallError::InvalidArguments { .. } => code::INVALID_PARAMS,
        };
        Self::new(code, err.to_string())
    }
}

/// Operation failures keep their full message; `data.kind` comes from the
/// first typed error found in the chain.
pub fn operation_error(err: &anyhow::Error) -> RpcError {
    let kind = err
        .chain()
        .find_map(|cause| {
            if let Some(err) = cause.downcast_ref::<GenerationError>() {
                return Some(err.kind());
            }
            if let Some(err) = cause.downcast_ref::<QueueError>() {
                return Some(match err {
                    QueueError::EmptyPrompt => "empty_prompt",
                    QueueError::NotFound(_) => "queue_identifier_not_found",
                    QueueError::InvalidFilename(_) => "invalid_filename",
                    QueueError::Malformed { .. } => "queue_malformed",
                    QueueError::Io { .. } => "queue_io",
                });
            }
            cause
                .downcast_ref::<ConfigError>()
                .map(|_| "configuration_error")
        })
        .unwrap_or("internal");
    RpcError {
        code: code::OPERATION_FAILED,
        message: format!("{err:#}"),
        kind: Some(kind),
    }
}

/// Splits one line into an [`Incoming`], or the error response to send back.
pub fn parse_line(line: &str) -> Result<Incoming, Value> {
    let value: Value = serde_json::from_str(line).map_err(|err| {
        failure(
            Value::Null,
            &RpcError::new(code::PARSE_ERROR, format!("Parse error: {err}")),
        )
    })?;
    let Value::Object(mut object) = value else {
        return Err(failure(
            Value::Null,
            &RpcError::new(code::INVALID_REQUEST, "Invalid request: expected an object"),
        ));
    };
    let id = object.remove("id");
    let Some(method) = object
        .remove("method")
        .and_then(|method| method.as_str().map(str::to_string))
    else {
        return Err(failure(
            id.unwrap_or(Value::Null),
            &RpcError::new(code::INVALID_REQUEST, "Invalid request: missing `method`"),
        ));
    };
    let params = match object.remove("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(params)) => params,
        Some(_) => {
            return Err(failure(
                id.unwrap_or(Value::Null),
                &RpcError::new(code::INVALID_PARAMS, "`params` must be an object"),
            ))
        }
    };
    Ok(Incoming { id, method, params })
}

pub fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub fn failure(id: Value, error: &RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error.to_value(),
    })
}
