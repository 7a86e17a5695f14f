//! JSON-RPC 2.0 envelopes and error decoding shared by the HTTP client and the
//! streaming client.

use serde_json::Value;

use crate::error::{CoreError, InstructionError, RpcError, TransactionError};

#[derive(serde::Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    pub(crate) jsonrpc: &'static str,
    pub(crate) id: u64,
    pub(crate) method: &'a str,
    pub(crate) params: &'a [Value],
}

impl<'a> JsonRpcRequest<'a> {
    pub(crate) fn new(id: u64, method: &'a str, params: &'a [Value]) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }

    pub(crate) fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self)
            .map_err(|e| CoreError::Protocol(format!("encode {} request: {e}", self.method)))
    }
}

#[derive(serde::Deserialize)]
pub(crate) struct JsonRpcResponse {
    #[serde(default)]
    pub(crate) id: Value,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<Value>,
}

impl JsonRpcResponse {
    /// Split into the result or the decoded error. A missing result is `null`.
    pub(crate) fn into_result(self) -> Result<Value, CoreError> {
        if let Some(err) = self.error {
            return Err(parse_jsonrpc_error(err));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Read a response id. Servers echo it back as a number; some proxies turn it
/// into a string.
pub(crate) fn parse_response_id(id: &Value) -> Result<u64, CoreError> {
    if let Some(n) = id.as_u64() {
        return Ok(n);
    }

    if let Some(s) = id.as_str() {
        return s
            .parse::<u64>()
            .map_err(|e| CoreError::Protocol(format!("invalid response id string: {e}")));
    }

    Err(CoreError::Protocol(format!("invalid response id: {id}")))
}

/// Parse a JSON-RPC error value into a structured `CoreError`.
///
/// Errors shaped like `{"code": <int>, "message": <string>, "data": ...}`
/// become `Rpc`; when `data` carries `err` and `logs` (failed preflight), the
/// transaction failure is decoded alongside. Anything else is `Protocol`.
pub(crate) fn parse_jsonrpc_error(err: Value) -> CoreError {
    #[derive(serde::Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
        #[serde(default)]
        data: Option<Value>,
    }

    let parsed = match serde_json::from_value::<JsonRpcError>(err.clone()) {
        Ok(parsed) => parsed,
        Err(_) => return CoreError::Protocol(format!("non-standard JSON-RPC error: {err}")),
    };

    let mut rpc = RpcError {
        code: Some(parsed.code),
        message: parsed.message,
        data: parsed.data,
        transaction_error: None,
        logs: Vec::new(),
    };

    if let Some(Value::Object(data)) = &rpc.data {
        rpc.transaction_error = data
            .get("err")
            .filter(|e| !e.is_null())
            .map(decode_transaction_error);
        rpc.logs = decode_logs(data.get("logs"));
    }

    CoreError::Rpc(rpc)
}

/// Decode a transaction error value (`meta.err`, simulation `err`, signature
/// notification `err`).
///
/// `{"InstructionError": [idx, {"Type": code}]}` yields the type and the code
/// rendered as text (`"unknown"` for non-scalar codes); `[idx, "Type"]` yields
/// the type with an empty code. Other shapes keep only the raw value.
pub fn decode_transaction_error(value: &Value) -> TransactionError {
    TransactionError {
        raw: value.clone(),
        instruction_error: value
            .get("InstructionError")
            .and_then(Value::as_array)
            .and_then(|pair| decode_instruction_error(pair)),
    }
}

fn decode_instruction_error(pair: &[Value]) -> Option<InstructionError> {
    let [index, detail] = pair else {
        return None;
    };
    let index = index.as_u64()?;

    match detail {
        Value::String(kind) => Some(InstructionError {
            index,
            error_type: kind.clone(),
            error_code: String::new(),
        }),
        Value::Object(map) => {
            let (kind, code) = map.iter().next()?;
            let error_code = match code {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => "unknown".to_owned(),
            };
            Some(InstructionError {
                index,
                error_type: kind.clone(),
                error_code,
            })
        }
        _ => None,
    }
}

pub(crate) fn decode_logs(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(|line| line.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

/// Wrap a transaction error reported outside a JSON-RPC error envelope
/// (signature notification, simulation) into an `RpcError` without a code.
pub(crate) fn transaction_failure(err: TransactionError, logs: Vec<String>) -> RpcError {
    RpcError {
        code: None,
        message: err.to_string(),
        data: Some(err.raw.clone()),
        transaction_error: Some(err),
        logs,
    }
}
