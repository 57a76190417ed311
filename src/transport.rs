use std::time::Duration;

use async_trait::async_trait;

use crate::{ApiRequest, ApiResponse, Body, TransportError};

/// Sends one prepared request and returns the raw response.
///
/// Implementations must not retry or interpret status codes; the pipeline
/// built on top of this trait owns those decisions.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Formats a Guacamole host into its API root.
///
/// Example: `"http://localhost:8080/guacamole/"` → `"http://localhost:8080/guacamole/api"`
pub fn host_to_api_url(host: &str) -> String {
    format!("{}/api", host.trim().trim_end_matches('/'))
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    api_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, timeout)
    }

    pub fn with_client(http: reqwest::Client, api_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_owned(),
            timeout,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url_for(&request.path))
            .headers(request.headers.clone())
            .timeout(self.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &request.body {
            Some(Body::Json(value)) => builder.json(value),
            Some(Body::Form(pairs)) => builder.form(pairs),
            Some(Body::Bytes(bytes)) => builder.body(bytes.clone()),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(ApiResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{host_to_api_url, ReqwestTransport};

    #[test]
    fn api_url_from_host() {
        assert_eq!(
            host_to_api_url("http://localhost:8080/guacamole/"),
            "http://localhost:8080/guacamole/api"
        );
        assert_eq!(host_to_api_url(" https://guac "), "https://guac/api");
    }

    #[test]
    fn url_for_joins_relative_paths() {
        let transport = ReqwestTransport::new("http://guac/api/", Duration::from_secs(1));
        assert_eq!(transport.url_for("/tokens"), "http://guac/api/tokens");
        assert_eq!(
            transport.url_for("session/data/mysql/users"),
            "http://guac/api/session/data/mysql/users"
        );
        assert_eq!(
            transport.url_for("https://other/x"),
            "https://other/x"
        );
    }
}
