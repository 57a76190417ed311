//! `guacamole-http` is an HTTP client for the Apache Guacamole REST API.
//!
//! Every call goes through one pipeline:
//! - [`TokenStore`] hands out a cached session token, logging in through an
//!   [`Authenticator`] when it is missing or idle-expired
//! - [`AuthenticatingExecutor`] attaches it as the `token` query parameter and
//!   recovers once from a 401
//! - [`RetryExecutor`] retries transient failures per [`RetryPolicy`]
//! - [`decode::classify`] maps the final status to a [`GuacError`]
//!
//! [`GuacamoleClient`] is the async entry point; [`blocking::GuacamoleClient`]
//! runs the same pipeline for synchronous callers.

mod auth;
pub mod blocking;
mod client;
mod context;
pub mod decode;
mod error;
mod options;
mod params;
pub mod retry;
mod session;
mod token;
mod transport;
mod types;
mod wire;

pub use auth::{Authenticator, SessionAuthenticator};
pub use client::GuacamoleClient;
pub use context::{CallContext, Hooks, NoopHooks};
pub use error::{GuacError, HttpFailure, TransportError, TransportErrorKind};
pub use options::{ClientOptions, GuacamoleConfig};
pub use params::{build_path, encode_client_url_token, ClientObjectKind};
pub use retry::{RetryExecutor, RetryPolicy, Sleeper, TokioSleeper};
pub use session::{AuthenticatingExecutor, TOKEN_PARAM};
pub use token::{Token, TokenStore, DEFAULT_IDLE_TIMEOUT};
pub use transport::{host_to_api_url, ReqwestTransport, Transport};
pub use types::{ApiRequest, ApiResponse, Body, Credentials, Decoded};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, GuacError>;
