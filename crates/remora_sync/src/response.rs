//! Normalization of raw responses into documents or errors.

use crate::error::{RemoteError, RemoteErrorKind, SyncError, SyncResult};
use crate::transport::{Response, TransportError};
use remora_core::WireDocument;
use serde_json::Value as Json;

const NOT_FOUND_MESSAGE: &str = "Resource not found.";
const INVALID_JSON_MESSAGE: &str = "Invalid JSON format.";

/// Turns the outcome of a transport call into a JSON object or an error.
pub(crate) fn interpret(outcome: Result<Response, TransportError>) -> SyncResult<WireDocument> {
    let response = outcome?;
    if response.is_success() {
        success_body(&response)
    } else {
        Err(error_body(&response).into())
    }
}

fn success_body(response: &Response) -> SyncResult<WireDocument> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(WireDocument::new());
    }
    match serde_json::from_slice::<Json>(&response.body) {
        Ok(Json::Object(document)) => Ok(document),
        Ok(other) => Err(SyncError::data_format(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
        Err(_) => Err(RemoteError::inferred(
            response.status,
            RemoteErrorKind::InvalidJson,
            INVALID_JSON_MESSAGE,
        )
        .into()),
    }
}

fn error_body(response: &Response) -> RemoteError {
    let status = response.status;
    let parsed = serde_json::from_slice::<Json>(&response.body);
    match parsed {
        Ok(Json::Object(body)) => {
            let code = body.get("error_code").map_or(0, lenient_int);
            let message = body
                .get("error_message")
                .and_then(Json::as_str)
                .unwrap_or("");
            if code != 0 || !message.is_empty() {
                let details = body.get("error_details").and_then(Json::as_object).cloned();
                RemoteError::server(status, code, message, details)
            } else {
                unexpected_status(status)
            }
        }
        Ok(_) => unexpected_status(status),
        Err(_) if status == 404 => {
            RemoteError::inferred(status, RemoteErrorKind::NotFound, NOT_FOUND_MESSAGE)
        }
        Err(_) => RemoteError::inferred(status, RemoteErrorKind::InvalidJson, INVALID_JSON_MESSAGE),
    }
}

fn unexpected_status(status: u16) -> RemoteError {
    RemoteError::inferred(
        status,
        RemoteErrorKind::Status,
        format!("unexpected HTTP status {status}"),
    )
}

/// Reads an integer the way loosely typed servers send them: numbers,
/// numeric strings, or anything else as zero.
pub(crate) fn lenient_int(value: &Json) -> i64 {
    match value {
        Json::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Json::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn json_type(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}
