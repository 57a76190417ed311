use std::{fmt, sync::Arc};

use serde::de::DeserializeOwned;

use crate::{
    decode::{self, classify},
    transport::host_to_api_url,
    ApiRequest, ApiResponse, AuthenticatingExecutor, CallContext, ClientOptions, Decoded,
    GuacamoleConfig, Hooks, Result, RetryExecutor, ReqwestTransport, SessionAuthenticator,
    Sleeper, TokenStore, Transport,
};

#[derive(Clone)]
/// Async client for the Guacamole REST API.
///
/// Cloning is cheap; clones share the session token.
pub struct GuacamoleClient {
    config: Arc<GuacamoleConfig>,
    options: ClientOptions,
    custom_transport: Option<Arc<dyn Transport>>,
    hooks: Option<Arc<dyn Hooks>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    executor: AuthenticatingExecutor,
}

impl fmt::Debug for GuacamoleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuacamoleClient")
            .field("config", &self.config)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl GuacamoleClient {
    /// Creates a client using `reqwest` with default options.
    pub fn new(config: GuacamoleConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates a client over a custom [`Transport`].
    ///
    /// The transport receives paths relative to the API root.
    pub fn with_transport(config: GuacamoleConfig, transport: Arc<dyn Transport>) -> Self {
        Self::build(config, Some(transport))
    }

    fn build(config: GuacamoleConfig, custom_transport: Option<Arc<dyn Transport>>) -> Self {
        let config = Arc::new(config);
        let options = ClientOptions::default();
        let executor = build_executor(&config, &options, custom_transport.clone(), None, None);
        Self {
            config,
            options,
            custom_transport,
            hooks: None,
            sleeper: None,
            executor,
        }
    }

    /// Creates a client from `GUACAMOLE_*` environment variables.
    ///
    /// See [`GuacamoleConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(GuacamoleConfig::from_env()?))
    }

    /// Applies client options such as timeout and retry behavior.
    ///
    /// Starts a fresh session: a previously cached token is dropped, not revoked.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self.rebuild()
    }

    /// Installs per-attempt observability hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = Some(hooks);
        self.rebuild()
    }

    /// Replaces the backoff suspension primitive.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self.rebuild()
    }

    fn rebuild(mut self) -> Self {
        self.executor = build_executor(
            &self.config,
            &self.options,
            self.custom_transport.clone(),
            self.hooks.clone(),
            self.sleeper.clone(),
        );
        self
    }

    pub fn config(&self) -> &GuacamoleConfig {
        &self.config
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        self.executor.store()
    }

    /// Path under the configured data source, e.g. `session/data/postgresql/users`.
    pub fn data_source_path(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        let data_source = urlencoding::encode(&self.config.data_source);
        if path.is_empty() {
            format!("session/data/{data_source}")
        } else {
            format!("session/data/{data_source}/{path}")
        }
    }

    /// Sends an authenticated, retried request and returns the final response
    /// without interpreting its status.
    pub async fn send(&self, request: ApiRequest, ctx: &CallContext) -> Result<ApiResponse> {
        self.executor.execute(&request, ctx).await
    }

    /// Sends a request and maps non-2xx statuses to typed errors.
    pub async fn request(&self, request: ApiRequest) -> Result<Decoded> {
        self.request_with(request, &CallContext::new()).await
    }

    /// Like [`GuacamoleClient::request`], honoring cancellation and deadlines.
    pub async fn request_with(&self, request: ApiRequest, ctx: &CallContext) -> Result<Decoded> {
        let response = classify(self.send(request, ctx).await?)?;
        decode::decode(&response)
    }

    /// Sends a request and deserializes a successful JSON body into `T`.
    pub async fn request_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.request_json_with(request, &CallContext::new()).await
    }

    /// [`request_json`](Self::request_json) bounded by `ctx`.
    pub async fn request_json_with<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        ctx: &CallContext,
    ) -> Result<T> {
        let response = classify(self.send(request, ctx).await?)?;
        decode::decode_json(&response)
    }

    /// Revokes the session token, if any. The client stays usable and will
    /// log in again on the next request.
    pub async fn close(&self) {
        self.executor.store().close().await;
    }
}

fn build_executor(
    config: &GuacamoleConfig,
    options: &ClientOptions,
    custom_transport: Option<Arc<dyn Transport>>,
    hooks: Option<Arc<dyn Hooks>>,
    sleeper: Option<Arc<dyn Sleeper>>,
) -> AuthenticatingExecutor {
    let transport: Arc<dyn Transport> = match custom_transport {
        Some(transport) => transport,
        None => Arc::new(ReqwestTransport::new(
            host_to_api_url(&config.host),
            options.timeout(),
        )),
    };
    let authenticator = Arc::new(SessionAuthenticator::new(transport.clone()));
    let store = Arc::new(TokenStore::new(
        authenticator,
        config.credentials(),
        config.idle_timeout,
    ));

    let mut retry = RetryExecutor::new(options.retry.clone());
    if let Some(hooks) = hooks {
        retry = retry.with_hooks(hooks);
    }
    if let Some(sleeper) = sleeper {
        retry = retry.with_sleeper(sleeper);
    }

    AuthenticatingExecutor::new(store, retry, transport)
}

#[cfg(test)]
mod tests {
    use super::GuacamoleClient;
    use crate::GuacamoleConfig;

    fn client() -> GuacamoleClient {
        GuacamoleClient::new(GuacamoleConfig::new(
            "http://localhost:8080/guacamole",
            "guacadmin",
            "secret-password",
            "my sql",
        ))
    }

    #[test]
    fn data_source_path_prefixes_session_data() {
        let client = client();
        assert_eq!(
            client.data_source_path("/users"),
            "session/data/my%20sql/users"
        );
        assert_eq!(client.data_source_path(""), "session/data/my%20sql");
    }

    #[test]
    fn debug_redacts_password() {
        let debug = format!("{:?}", client());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-password"));
    }
}
