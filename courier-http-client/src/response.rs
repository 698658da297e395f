//! HTTP response wrapper.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::{self, Codec};
use crate::transport::TransportError;
use crate::{HttpClientError, Result};

/// HTTP response wrapper.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    url: url::Url,
}

impl Response {
    /// Create a response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, url: url::Url) -> Self {
        Self {
            status,
            headers,
            body,
            url,
        }
    }

    /// Create a response from a reqwest response, reading the full body.
    pub(crate) async fn from_reqwest(
        response: reqwest::Response,
    ) -> std::result::Result<Self, TransportError> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        Ok(Self {
            status,
            headers,
            body,
            url,
        })
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if the response was a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Check if the response was a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the response URL.
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Get the response body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body as bytes.
    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Get the response body as text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| HttpClientError::InvalidResponse(format!("body is not UTF-8: {e}")))
    }

    /// Decode the body with `codec`.
    pub fn decode<T: DeserializeOwned>(&self, codec: &dyn Codec) -> Result<T> {
        Ok(codec::decode_payload(codec, &self.body)?)
    }

    /// Decode the value nested under `key` in an envelope body.
    ///
    /// `key` is matched against the body as received, before the codec
    /// rewrites any keys.
    pub fn decode_wrapped<T: DeserializeOwned>(&self, codec: &dyn Codec, key: &str) -> Result<T> {
        let envelope = codec.deserialize(&self.body)?;
        let inner = codec.from_wire(unwrap_envelope(envelope, key)?);
        Ok(codec::decode_value(inner)?)
    }

    /// Get the content type if available.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Take the value nested under `key` out of an envelope object.
///
/// A missing key, a `null` value or a non-object envelope is an
/// [`HttpClientError::InvalidResponse`].
pub fn unwrap_envelope(envelope: Value, key: &str) -> Result<Value> {
    let Value::Object(mut members) = envelope else {
        return Err(HttpClientError::InvalidResponse(format!(
            "expected an object wrapping `{key}`"
        )));
    };

    match members.remove(key) {
        Some(Value::Null) | None => Err(HttpClientError::InvalidResponse(format!(
            "wrapped payload `{key}` is missing"
        ))),
        Some(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonCodec;
    use serde::Deserialize;
    use serde_json::json;

    fn response(status: StatusCode, body: &'static str) -> Response {
        Response::new(
            status,
            HeaderMap::new(),
            Bytes::from_static(body.as_bytes()),
            url::Url::parse("https://api.example.com/items").unwrap(),
        )
    }

    #[test]
    fn test_unwrap_envelope() {
        let inner = unwrap_envelope(json!({"data": {"id": 7}}), "data").unwrap();
        assert_eq!(inner, json!({"id": 7}));

        let missing = unwrap_envelope(json!({"other": {"id": 7}}), "data");
        assert!(matches!(missing, Err(HttpClientError::InvalidResponse(_))));

        let null = unwrap_envelope(json!({"data": null}), "data");
        assert!(matches!(null, Err(HttpClientError::InvalidResponse(_))));

        let scalar = unwrap_envelope(json!(3), "data");
        assert!(matches!(scalar, Err(HttpClientError::InvalidResponse(_))));
    }

    #[test]
    fn test_decode_wrapped() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct Item {
            item_id: u32,
        }

        let codec = JsonCodec::snake_case();
        let response = response(StatusCode::OK, r#"{"data": {"item_id": 7}}"#);
        let item: Item = response.decode_wrapped(&codec, "data").unwrap();
        assert_eq!(item, Item { item_id: 7 });
    }

    #[test]
    fn test_decode_wrapped_matches_wire_key() {
        #[derive(Debug, Deserialize, PartialEq)]
        #[serde(rename_all = "camelCase")]
        struct Profile {
            display_name: String,
        }

        let codec = JsonCodec::snake_case();
        let response = response(
            StatusCode::OK,
            r#"{"user_data": {"display_name": "Ada"}}"#,
        );

        let profile: Profile = response.decode_wrapped(&codec, "user_data").unwrap();
        assert_eq!(profile.display_name, "Ada");

        let renamed: Result<Profile> = response.decode_wrapped(&codec, "userData");
        assert!(matches!(renamed, Err(HttpClientError::InvalidResponse(_))));
    }

    #[test]
    fn test_decode_failure_is_invalid_data() {
        let codec = JsonCodec::new();
        let response = response(StatusCode::OK, "not json");
        let result: Result<Value> = response.decode(&codec);
        assert!(matches!(result, Err(HttpClientError::InvalidData(_))));
    }

    #[test]
    fn test_status_helpers() {
        assert!(response(StatusCode::OK, "").is_success());
        assert!(response(StatusCode::NOT_FOUND, "").is_client_error());
        assert!(response(StatusCode::BAD_GATEWAY, "").is_server_error());
    }
}
