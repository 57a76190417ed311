//! Session token cache with idle expiry.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};

use crate::{Authenticator, Credentials, GuacError, Result};

/// Default client-side mirror of Guacamole's idle session window.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// An issued session token. Replaced, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    issued_at: Instant,
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self::issued_at(value, Instant::now())
    }

    pub fn issued_at(value: impl Into<String>, issued_at: Instant) -> Self {
        Self {
            value: value.into(),
            issued_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued(&self) -> Instant {
        self.issued_at
    }

    /// True once `idle_timeout` has fully elapsed since issuance.
    ///
    /// A zero `idle_timeout` disables time-based expiry.
    pub fn is_expired_at(&self, now: Instant, idle_timeout: Duration) -> bool {
        if idle_timeout.is_zero() {
            return false;
        }
        now.saturating_duration_since(self.issued_at) >= idle_timeout
    }

    fn refreshed(&self, now: Instant) -> Self {
        Self::issued_at(self.value.clone(), now)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Holds at most one live token and refreshes it through an [`Authenticator`].
///
/// One mutex guards the whole check-refresh-store sequence. Every finished
/// exchange bumps a generation counter; a caller that queued behind an exchange
/// adopts its outcome, success or failure, instead of starting another one.
pub struct TokenStore {
    authenticator: Arc<dyn Authenticator>,
    credentials: Credentials,
    idle_timeout: Duration,
    generation: AtomicU64,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    token: Option<Token>,
    /// Outcome of the latest exchange when it failed.
    failure: Option<GuacError>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("credentials", &self.credentials)
            .field("idle_timeout", &self.idle_timeout)
            .field("generation", &self.generation.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        credentials: Credentials,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            authenticator,
            credentials,
            idle_timeout,
            generation: AtomicU64::new(0),
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Returns the stored token, authenticating first if it is missing or expired.
    pub async fn get_or_refresh(&self) -> Result<Token> {
        let seen = self.generation.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.token.as_ref() {
            if !token.is_expired_at(Instant::now(), self.idle_timeout) {
                return Ok(token.clone());
            }
            #[cfg(feature = "tracing")]
            tracing::debug!("session token idle-expired");
        }
        if let Some(err) = self.failure_since(&slot, seen) {
            return Err(err);
        }
        self.refresh_locked(&mut slot).await
    }

    /// Re-authenticates after `rejected` was refused by the server.
    ///
    /// If another caller already replaced `rejected`, its replacement is
    /// returned without a second exchange. If that replacement exchange
    /// failed, its failure is returned instead.
    pub async fn refresh_rejected(&self, rejected: &Token) -> Result<Token> {
        let seen = self.generation.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;
        if let Some(current) = slot.token.as_ref() {
            let now = Instant::now();
            if current.value != rejected.value && !current.is_expired_at(now, self.idle_timeout) {
                return Ok(current.clone());
            }
        }
        if let Some(err) = self.failure_since(&slot, seen) {
            return Err(err);
        }
        self.refresh_locked(&mut slot).await
    }

    /// The failure of an exchange that finished after generation `seen`.
    fn failure_since(&self, slot: &Slot, seen: u64) -> Option<GuacError> {
        if self.generation.load(Ordering::Acquire) == seen {
            return None;
        }
        slot.failure.clone()
    }

    async fn refresh_locked(&self, slot: &mut Slot) -> Result<Token> {
        slot.token = None;
        let outcome = self.authenticator.authenticate(&self.credentials).await;
        match &outcome {
            Ok(token) => {
                slot.token = Some(token.clone());
                slot.failure = None;
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "session token exchange failed");
                slot.failure = Some(err.clone());
            }
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    /// Slides the expiry window of a still-valid token.
    pub async fn touch(&self) {
        let mut slot = self.slot.lock().await;
        let now = Instant::now();
        if let Some(token) = slot.token.as_mut() {
            if !token.is_expired_at(now, self.idle_timeout) {
                *token = token.refreshed(now);
            }
        }
    }

    /// Drops the stored token so the next call re-authenticates.
    pub async fn invalidate(&self) {
        self.slot.lock().await.token.take();
    }

    /// The stored token, expired or not.
    pub async fn current(&self) -> Option<Token> {
        self.slot.lock().await.token.clone()
    }

    /// Drops the stored token and revokes it remotely.
    pub async fn close(&self) {
        let token = self.slot.lock().await.token.take();
        if let Some(token) = token {
            self.authenticator.revoke(&token).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::{Token, TokenStore, DEFAULT_IDLE_TIMEOUT};
    use crate::{Authenticator, Credentials, GuacError, HttpFailure, Result};

    /// Issues `token-1`, `token-2`, ... and counts exchanges and revocations.
    #[derive(Default)]
    pub(crate) struct CountingAuthenticator {
        pub(crate) issued: AtomicUsize,
        pub(crate) revoked: Mutex<Vec<String>>,
        pub(crate) delay: Duration,
        pub(crate) fail: bool,
    }

    impl CountingAuthenticator {
        pub(crate) fn exchanges(&self) -> usize {
            self.issued.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn authenticate(&self, _credentials: &Credentials) -> Result<Token> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(GuacError::Auth(HttpFailure::new(403, "Invalid login.")));
            }
            Ok(Token::new(format!("token-{n}")))
        }

        async fn revoke(&self, token: &Token) {
            self.revoked
                .lock()
                .expect("revoked mutex")
                .push(token.value().to_owned());
        }
    }

    fn store(auth: Arc<CountingAuthenticator>, idle_timeout: Duration) -> TokenStore {
        TokenStore::new(auth, Credentials::new("guacadmin", "guacadmin"), idle_timeout)
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let t0 = Instant::now();
        let token = Token::issued_at("t", t0);
        let idle = Duration::from_secs(300);

        assert!(!token.is_expired_at(t0, idle));
        assert!(!token.is_expired_at(t0 + idle - Duration::from_nanos(1), idle));
        assert!(token.is_expired_at(t0 + idle, idle));
        assert!(token.is_expired_at(t0 + idle * 3, idle));
    }

    #[test]
    fn zero_idle_timeout_never_expires() {
        let t0 = Instant::now();
        let token = Token::issued_at("t", t0);
        assert!(!token.is_expired_at(t0 + Duration::from_secs(86_400), Duration::ZERO));
    }

    #[test]
    fn debug_redacts_token_value() {
        let debug = format!("{:?}", Token::new("super-secret"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("super-secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_token_until_idle_timeout() {
        let auth = Arc::new(CountingAuthenticator::default());
        let store = store(auth.clone(), DEFAULT_IDLE_TIMEOUT);

        let first = store.get_or_refresh().await.expect("token");
        tokio::time::advance(DEFAULT_IDLE_TIMEOUT - Duration::from_secs(1)).await;
        let second = store.get_or_refresh().await.expect("token");
        assert_eq!(first.value(), second.value());
        assert_eq!(auth.exchanges(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let third = store.get_or_refresh().await.expect("token");
        assert_eq!(third.value(), "token-2");
        assert_eq!(auth.exchanges(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_slides_expiry() {
        let auth = Arc::new(CountingAuthenticator::default());
        let idle = Duration::from_secs(60);
        let store = store(auth.clone(), idle);

        store.get_or_refresh().await.expect("token");
        tokio::time::advance(Duration::from_secs(59)).await;
        store.touch().await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let current = store.current().await.expect("stored token");
        assert!(!current.is_expired_at(Instant::now(), idle));
        assert_eq!(store.get_or_refresh().await.expect("token").value(), "token-1");
        assert_eq!(auth.exchanges(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_ignores_expired_or_missing_token() {
        let auth = Arc::new(CountingAuthenticator::default());
        let idle = Duration::from_secs(60);
        let store = store(auth.clone(), idle);

        store.touch().await;
        assert!(store.current().await.is_none());

        let issued = store.get_or_refresh().await.expect("token");
        tokio::time::advance(idle).await;
        store.touch().await;
        let current = store.current().await.expect("still stored");
        assert_eq!(current.issued(), issued.issued());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_exchange() {
        let auth = Arc::new(CountingAuthenticator {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let store = Arc::new(store(auth.clone(), DEFAULT_IDLE_TIMEOUT));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_refresh().await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.expect("task").expect("token");
            assert_eq!(token.value(), "token-1");
        }
        assert_eq!(auth.exchanges(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_failure() {
        let auth = Arc::new(CountingAuthenticator {
            delay: Duration::from_millis(50),
            fail: true,
            ..Default::default()
        });
        let store = Arc::new(store(auth.clone(), DEFAULT_IDLE_TIMEOUT));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_refresh().await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.expect("task").expect_err("login must fail");
            assert_eq!(err.status(), Some(403));
            assert!(matches!(err, GuacError::Auth(_)));
        }
        assert_eq!(auth.exchanges(), 1);

        // A caller arriving after the failure settled tries again.
        store.get_or_refresh().await.expect_err("still failing");
        assert_eq!(auth.exchanges(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_rejections_share_one_replacement() {
        let auth = Arc::new(CountingAuthenticator {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let store = Arc::new(store(auth.clone(), DEFAULT_IDLE_TIMEOUT));
        let rejected = store.get_or_refresh().await.expect("token");

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                let rejected = rejected.clone();
                tokio::spawn(async move { store.refresh_rejected(&rejected).await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.expect("task").expect("token");
            assert_eq!(token.value(), "token-2");
        }
        assert_eq!(auth.exchanges(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_rejections_share_a_failed_replacement() {
        let auth = Arc::new(CountingAuthenticator {
            delay: Duration::from_millis(50),
            fail: true,
            ..Default::default()
        });
        let store = Arc::new(store(auth.clone(), DEFAULT_IDLE_TIMEOUT));
        let rejected = Token::new("stale");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let rejected = rejected.clone();
                tokio::spawn(async move { store.refresh_rejected(&rejected).await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.expect("task").expect_err("refresh must fail");
            assert!(matches!(err, GuacError::Auth(_)));
        }
        assert_eq!(auth.exchanges(), 1);
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn failed_exchange_leaves_store_empty() {
        let auth = Arc::new(CountingAuthenticator {
            fail: true,
            ..Default::default()
        });
        let store = store(auth.clone(), DEFAULT_IDLE_TIMEOUT);

        let err = store.get_or_refresh().await.expect_err("must fail");
        assert!(matches!(err, GuacError::Auth(_)));
        assert!(store.current().await.is_none());
    }

    #[tokio::test]
    async fn invalidate_forces_reauthentication() {
        let auth = Arc::new(CountingAuthenticator::default());
        let store = store(auth.clone(), Duration::ZERO);

        store.get_or_refresh().await.expect("token");
        store.invalidate().await;
        let token = store.get_or_refresh().await.expect("token");
        assert_eq!(token.value(), "token-2");
    }

    #[tokio::test]
    async fn refresh_rejected_only_replaces_the_rejected_token() {
        let auth = Arc::new(CountingAuthenticator::default());
        let store = store(auth.clone(), DEFAULT_IDLE_TIMEOUT);

        let rejected = store.get_or_refresh().await.expect("token");
        let fresh = store.refresh_rejected(&rejected).await.expect("token");
        assert_eq!(fresh.value(), "token-2");

        let again = store.refresh_rejected(&rejected).await.expect("token");
        assert_eq!(again.value(), "token-2");
        assert_eq!(auth.exchanges(), 2);
    }

    #[tokio::test]
    async fn close_revokes_stored_token() {
        let auth = Arc::new(CountingAuthenticator::default());
        let store = store(auth.clone(), DEFAULT_IDLE_TIMEOUT);

        store.close().await;
        assert!(auth.revoked.lock().expect("revoked").is_empty());

        store.get_or_refresh().await.expect("token");
        store.close().await;
        assert_eq!(*auth.revoked.lock().expect("revoked"), vec!["token-1".to_owned()]);
        assert!(store.current().await.is_none());
    }
}
