//! # Client Audio Payload Decoding
//!
//! The `audio` field of a client request has been observed in several
//! serialized shapes depending on the frontend's WebSocket library: a plain
//! JSON array of byte values, a Node-style `{"type":"Buffer","data":[...]}`
//! wrapper, a bare `{"data":[...]}` wrapper, or a JSON string that itself
//! contains one of those wrappers. Each recognized shape gets its own
//! decoder; everything else is an input error and the remote service is
//! never contacted.

use crate::error::{AppError, AppResult};
use serde_json::Value;

/// A recognized client audio encoding, classified before any byte is
/// inspected further.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioPayload {
    /// Plain JSON array of byte values
    ByteArray(Vec<u8>),
    /// Node `Buffer.toJSON()` output: `{"type":"Buffer","data":[...]}`
    NodeBuffer(Vec<u8>),
    /// Bare `{"data":[...]}` wrapper
    DataWrapper(Vec<u8>),
    /// A JSON string whose content parses to one of the wrapper shapes
    Nested(Vec<u8>),
}

impl AudioPayload {
    /// Classify a raw `audio` JSON value into a recognized encoding.
    pub fn classify(value: &Value) -> AppResult<Self> {
        match value {
            Value::Array(items) => Ok(AudioPayload::ByteArray(bytes_from_array(items)?)),
            Value::Object(map) => {
                let data = map.get("data").and_then(Value::as_array);
                match (map.get("type").and_then(Value::as_str), data) {
                    (Some("Buffer"), Some(items)) => {
                        Ok(AudioPayload::NodeBuffer(bytes_from_array(items)?))
                    }
                    (None, Some(items)) => {
                        Ok(AudioPayload::DataWrapper(bytes_from_array(items)?))
                    }
                    _ => Err(AppError::Input(
                        "Unrecognized audio object; expected a Buffer-style wrapper".to_string(),
                    )),
                }
            }
            Value::String(text) => classify_string(text),
            _ => Err(AppError::Input("Unrecognized audio encoding".to_string())),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            AudioPayload::ByteArray(bytes)
            | AudioPayload::NodeBuffer(bytes)
            | AudioPayload::DataWrapper(bytes)
            | AudioPayload::Nested(bytes) => bytes,
        }
    }
}

/// A stringified `audio` field. One frontend iteration stringified the
/// typed array itself, which yields the useless literal
/// `"[object Uint8Array]"`; that case gets a pointed error message so the
/// frontend bug is identifiable from the client side.
fn classify_string(text: &str) -> AppResult<AudioPayload> {
    if text == "[object Uint8Array]" {
        return Err(AppError::Input(
            "audio was serialized as \"[object Uint8Array]\"; send the raw byte array instead"
                .to_string(),
        ));
    }

    let parsed: Value = serde_json::from_str(text)
        .map_err(|_| AppError::Input("Unrecognized audio encoding".to_string()))?;

    match AudioPayload::classify(&parsed)? {
        AudioPayload::NodeBuffer(bytes)
        | AudioPayload::DataWrapper(bytes)
        | AudioPayload::ByteArray(bytes) => Ok(AudioPayload::Nested(bytes)),
        // double-stringified payloads are not recognized
        AudioPayload::Nested(_) => {
            Err(AppError::Input("Unrecognized audio encoding".to_string()))
        }
    }
}

fn bytes_from_array(items: &[Value]) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(items.len());
    for item in items {
        let byte = item
            .as_u64()
            .filter(|&v| v <= u8::MAX as u64)
            .ok_or_else(|| {
                AppError::Input("Audio byte array contains non-byte values".to_string())
            })?;
        bytes.push(byte as u8);
    }
    Ok(bytes)
}

/// Decode the client `audio` field into raw recorded bytes, rejecting empty
/// or unrecognized payloads before any transcoding or remote call.
pub fn decode_audio(value: &Value) -> AppResult<Vec<u8>> {
    let bytes = AudioPayload::classify(value)?.into_bytes();
    if bytes.is_empty() {
        return Err(AppError::Input("Audio payload is empty".to_string()));
    }
    Ok(bytes)
}
