use std::fmt;

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Method,
};

use crate::GuacError;

/// Request body variants understood by the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// Serialized as `application/json`.
    Json(serde_json::Value),
    /// Serialized as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    /// Sent verbatim.
    Bytes(Vec<u8>),
}

/// Transport-agnostic description of an outbound API call.
///
/// `path` is relative to the API root (`{host}/api`); absolute `http(s)://`
/// URLs are sent as-is.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Body>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Appends a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Adds a header, rejecting invalid names or values.
    pub fn header(mut self, name: &str, value: &str) -> crate::Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| GuacError::Config(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| GuacError::Config(format!("invalid header value: {err}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(Body::Json(value));
        self
    }

    pub fn form<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Some(Body::Form(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        ));
        self
    }

    pub fn bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(Body::Bytes(body.into()));
        self
    }

    /// Returns the first value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Replaces every occurrence of `name` with a single `name=value` pair.
    pub(crate) fn set_query(&mut self, name: &str, value: &str) {
        self.query.retain(|(key, _)| key != name);
        self.query.push((name.to_owned(), value.to_owned()));
    }
}

/// Transport-agnostic response.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Builds a response with a JSON body and content type.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status, value.to_string());
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> &str {
        self.header(CONTENT_TYPE.as_str()).unwrap_or("")
    }

    /// Body as lossy UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Decoded body of a successful response.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// 204 responses.
    NoContent,
    Json(serde_json::Value),
    Text(String),
}

/// Username/password pair exchanged for a session token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    identifier: String,
    secret: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderValue, RETRY_AFTER};
    use serde_json::json;

    use super::{ApiRequest, ApiResponse, Credentials};

    #[test]
    fn set_query_replaces_existing_values() {
        let mut request = ApiRequest::get("session/data/postgresql/users")
            .query("token", "old")
            .query("limit", "5")
            .query("token", "older");
        request.set_query("token", "new");

        assert_eq!(request.query_value("token"), Some("new"));
        assert_eq!(
            request.query.iter().filter(|(key, _)| key == "token").count(),
            1
        );
        assert_eq!(request.query_value("limit"), Some("5"));
    }

    #[test]
    fn header_rejects_invalid_name() {
        assert!(ApiRequest::get("x").header("bad header", "v").is_err());
        let request = ApiRequest::get("x")
            .header("x-trace", "abc")
            .expect("valid header");
        assert_eq!(request.headers["x-trace"], "abc");
    }

    #[test]
    fn response_helpers() {
        let response = ApiResponse::json(200, &json!({"ok": true}))
            .with_header(RETRY_AFTER, HeaderValue::from_static("3"));
        assert!(response.is_success());
        assert_eq!(response.content_type(), "application/json");
        assert_eq!(response.header("retry-after"), Some("3"));
        assert!(!ApiResponse::new(404, "").is_success());
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let debug = format!("{:?}", Credentials::new("guacadmin", "hunter2"));
        assert!(debug.contains("guacadmin"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }
}
