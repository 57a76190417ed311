use std::{fmt, sync::Arc};

use crate::{
    ApiRequest, ApiResponse, CallContext, Result, RetryExecutor, Token, TokenStore, Transport,
};

/// Query parameter carrying the session token on every authenticated call.
pub const TOKEN_PARAM: &str = "token";

const UNAUTHORIZED: u16 = 401;

/// Attaches the session token to each request and recovers once from a 401.
///
/// Sends go through the [`RetryExecutor`], so transient failures are retried
/// inside each of the (at most two) authenticated sends.
#[derive(Clone)]
pub struct AuthenticatingExecutor {
    store: Arc<TokenStore>,
    retry: RetryExecutor,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for AuthenticatingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatingExecutor")
            .field("store", &self.store)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl AuthenticatingExecutor {
    pub fn new(store: Arc<TokenStore>, retry: RetryExecutor, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            retry,
            transport,
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Sends `request` with a valid token.
    ///
    /// A 401 invalidates the token, forces one refresh and resends once; a
    /// second 401 is returned as-is. Other outcomes pass through.
    pub async fn execute(&self, request: &ApiRequest, ctx: &CallContext) -> Result<ApiResponse> {
        let token = ctx.run(self.store.get_or_refresh()).await??;
        let response = self.send_with(request, &token, ctx).await?;
        if response.status != UNAUTHORIZED {
            self.store.touch().await;
            return Ok(response);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            "session token rejected; refreshing once"
        );

        let token = ctx.run(self.store.refresh_rejected(&token)).await??;
        let response = self.send_with(request, &token, ctx).await?;
        if response.status != UNAUTHORIZED {
            self.store.touch().await;
        }
        Ok(response)
    }

    async fn send_with(
        &self,
        request: &ApiRequest,
        token: &Token,
        ctx: &CallContext,
    ) -> Result<ApiResponse> {
        let mut authed = request.clone();
        authed.set_query(TOKEN_PARAM, token.value());
        self.retry.execute(self.transport.as_ref(), &authed, ctx).await
    }
}
