//! Payload encoding and decoding.
//!
//! A [`Codec`] works on `serde_json::Value` so it can sit behind a trait
//! object; [`encode_payload`] and [`decode_payload`] bridge to typed values.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Codec failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How object keys are rewritten between Rust and the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// Keys are sent and read verbatim.
    #[default]
    UseDefaultKeys,
    /// camelCase keys are sent as snake_case and snake_case keys are read
    /// back as camelCase.
    ConvertSnakeCase,
}

/// Converts payloads to and from wire bytes.
pub trait Codec: Send + Sync {
    /// Content type of encoded bodies.
    fn content_type(&self) -> &str;

    /// Rewrite an outgoing value before it is placed in a query or body.
    fn to_wire(&self, value: Value) -> Value {
        value
    }

    /// Rewrite an incoming value before typed decoding.
    fn from_wire(&self, value: Value) -> Value {
        value
    }

    /// Serialize a wire value to bytes.
    fn serialize(&self, value: &Value) -> Result<Bytes, CodecError>;

    /// Parse bytes into a wire value. Empty input is `Value::Null`.
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// JSON codec with a configurable key strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    keys: KeyStrategy,
}

impl JsonCodec {
    /// Create a codec that keeps keys verbatim.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with the given key strategy.
    pub fn with_key_strategy(keys: KeyStrategy) -> Self {
        Self { keys }
    }

    /// Create a codec converting between camelCase and snake_case.
    pub fn snake_case() -> Self {
        Self::with_key_strategy(KeyStrategy::ConvertSnakeCase)
    }

    /// Active key strategy.
    pub fn key_strategy(&self) -> KeyStrategy {
        self.keys
    }
}

impl Codec for JsonCodec {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn to_wire(&self, value: Value) -> Value {
        match self.keys {
            KeyStrategy::UseDefaultKeys => value,
            KeyStrategy::ConvertSnakeCase => rename_keys(value, &to_snake_case),
        }
    }

    fn from_wire(&self, value: Value) -> Value {
        match self.keys {
            KeyStrategy::UseDefaultKeys => value,
            KeyStrategy::ConvertSnakeCase => rename_keys(value, &to_camel_case),
        }
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Encode a typed payload into a wire value.
pub fn encode_payload<T>(codec: &dyn Codec, payload: &T) -> Result<Value, CodecError>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(payload)?;
    Ok(codec.to_wire(value))
}

/// Decode bytes into a typed value.
pub fn decode_payload<T: DeserializeOwned>(codec: &dyn Codec, bytes: &[u8]) -> Result<T, CodecError> {
    let value = codec.from_wire(codec.deserialize(bytes)?);
    decode_value(value)
}

/// Decode an already parsed wire value into a typed value.
pub fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    Ok(serde_json::from_value(value)?)
}

fn rename_keys(value: Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (rename(&key), rename_keys(value, rename)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| rename_keys(v, rename)).collect())
        }
        other => other,
    }
}

/// Split `key` into leading underscores, core and trailing underscores.
fn split_underscores(key: &str) -> (&str, &str, &str) {
    let start = key.len() - key.trim_start_matches('_').len();
    if start == key.len() {
        return (key, "", "");
    }
    let end = key.trim_end_matches('_').len();
    (&key[..start], &key[start..end], &key[end..])
}

/// `userID` → `user_id`, `_someValue_` → `_some_value_`.
pub fn to_snake_case(key: &str) -> String {
    let (leading, core, trailing) = split_underscores(key);
    if core.is_empty() {
        return key.to_string();
    }

    let chars: Vec<char> = core.chars().collect();
    let mut out = String::with_capacity(core.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }

    format!("{leading}{out}{trailing}")
}

/// `user_id` → `userId`, `_some_value_` → `_someValue_`.
pub fn to_camel_case(key: &str) -> String {
    let (leading, core, trailing) = split_underscores(key);
    if !core.contains('_') {
        return key.to_string();
    }

    let mut parts = core.split('_').filter(|p| !p.is_empty());
    let mut out = String::with_capacity(core.len());
    if let Some(first) = parts.next() {
        out.push_str(first);
    }
    for part in parts {
        let mut chars = part.chars();
        if let Some(head) = chars.next() {
            out.extend(head.to_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
        }
    }

    format!("{leading}{out}{trailing}")
}
