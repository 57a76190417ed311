use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    wire::TokenResponse, ApiRequest, Credentials, GuacError, HttpFailure, Result, Token,
    Transport,
};

/// Exchanges credentials for session tokens. Holds no token state.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Performs one credential exchange.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Token>;

    /// Invalidates `token` remotely. Failures are swallowed.
    async fn revoke(&self, token: &Token);
}

/// Authenticator speaking Guacamole's `/api/tokens` protocol.
#[derive(Clone)]
pub struct SessionAuthenticator {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for SessionAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAuthenticator").finish_non_exhaustive()
    }
}

impl SessionAuthenticator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Authenticator for SessionAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Token> {
        let request = ApiRequest::post("tokens").form([
            ("username", credentials.identifier()),
            ("password", credentials.secret()),
        ]);
        let response = self.transport.send(&request).await?;

        if !response.is_success() {
            let status = response.status;
            return Err(GuacError::Auth(
                HttpFailure::new(status, "Failed to authenticate with Guacamole server")
                    .with_code(status.to_string())
                    .with_response(response),
            ));
        }

        let token = serde_json::from_slice::<TokenResponse>(&response.body)
            .ok()
            .and_then(|body| body.auth_token)
            .filter(|token| !token.is_empty());

        match token {
            Some(token) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(username = credentials.identifier(), "session token issued");
                Ok(Token::new(token))
            }
            None => Err(GuacError::Auth(
                HttpFailure::new(response.status, "Authentication response missing authToken")
                    .with_response(response),
            )),
        }
    }

    async fn revoke(&self, token: &Token) {
        let path = format!("tokens/{}", urlencoding::encode(token.value()));
        match self.transport.send(&ApiRequest::delete(path)).await {
            Ok(response) if response.is_success() => {
                #[cfg(feature = "tracing")]
                tracing::debug!("session token revoked");
            }
            Ok(_response) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(status = _response.status, "token revocation rejected");
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "token revocation failed");
            }
        }
    }
}
