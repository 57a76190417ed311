//! Blocking client for callers without an async runtime.
//!
//! Runs the same pipeline as [`crate::GuacamoleClient`] on a private tokio
//! runtime. Backoff delays block only the calling thread.
//!
//! Do not create or drop a blocking client from inside an async context.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::runtime::{Builder, Runtime};

use crate::{
    ApiRequest, ApiResponse, CallContext, ClientOptions, Decoded, GuacError, GuacamoleConfig,
    Hooks, Result, Sleeper, TokenStore, Transport,
};

/// Blocking counterpart of [`crate::GuacamoleClient`].
///
/// Safe to share across threads; all threads share one session token.
#[derive(Debug)]
pub struct GuacamoleClient {
    inner: crate::GuacamoleClient,
    runtime: Runtime,
}

impl GuacamoleClient {
    /// Creates a client using `reqwest` with default options.
    pub fn new(config: GuacamoleConfig) -> Result<Self> {
        Self::from_async(crate::GuacamoleClient::new(config))
    }

    /// Creates a client over a custom [`Transport`].
    pub fn with_transport(config: GuacamoleConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::from_async(crate::GuacamoleClient::with_transport(config, transport))
    }

    /// Creates a client from `GUACAMOLE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(GuacamoleConfig::from_env()?)
    }

    /// Wraps an async client; its session is shared with the original.
    pub fn from_async(inner: crate::GuacamoleClient) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("guacamole-http-blocking")
            .enable_all()
            .build()
            .map_err(|err| GuacError::Config(format!("failed to start runtime: {err}")))?;
        Ok(Self { inner, runtime })
    }

    /// Applies client options. Starts a fresh session.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.inner = self.inner.with_options(options);
        self
    }

    /// Installs per-attempt observability hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.inner = self.inner.with_hooks(hooks);
        self
    }

    /// Replaces the backoff suspension primitive.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.inner = self.inner.with_sleeper(sleeper);
        self
    }

    pub fn config(&self) -> &GuacamoleConfig {
        self.inner.config()
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        self.inner.token_store()
    }

    pub fn data_source_path(&self, path: &str) -> String {
        self.inner.data_source_path(path)
    }

    /// See [`crate::GuacamoleClient::send`].
    pub fn send(&self, request: ApiRequest, ctx: &CallContext) -> Result<ApiResponse> {
        self.runtime.block_on(self.inner.send(request, ctx))
    }

    /// See [`crate::GuacamoleClient::request`].
    pub fn request(&self, request: ApiRequest) -> Result<Decoded> {
        self.runtime.block_on(self.inner.request(request))
    }

    /// See [`crate::GuacamoleClient::request_with`].
    pub fn request_with(&self, request: ApiRequest, ctx: &CallContext) -> Result<Decoded> {
        self.runtime.block_on(self.inner.request_with(request, ctx))
    }

    /// See [`crate::GuacamoleClient::request_json`].
    pub fn request_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.runtime.block_on(self.inner.request_json(request))
    }

    /// See [`crate::GuacamoleClient::request_json_with`].
    pub fn request_json_with<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        ctx: &CallContext,
    ) -> Result<T> {
        self.runtime.block_on(self.inner.request_json_with(request, ctx))
    }

    /// Revokes the session token, if any.
    pub fn close(&self) {
        self.runtime.block_on(self.inner.close());
    }
}
