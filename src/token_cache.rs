// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::Result;
use crate::constants::TOKEN_REFRESH_SLACK;
use crate::errors;
use crate::token::{Token, TokenProvider};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
// Using tokio's wrapper makes the cache testable without relying on clock times.
use tokio::time::Instant;

/// Owns the cached token for one credentials instance.
///
/// Serves the cached token while it remains usable, and asks the inner
/// provider for a fresh one when the cache is empty, holds an error, or the
/// token is within [TOKEN_REFRESH_SLACK] of its expiration. A failed fetch
/// replaces the cached value but does not poison the cache: the next caller
/// triggers a new attempt.
#[derive(Debug)]
pub(crate) struct TokenCache<T>
where
    T: TokenProvider,
{
    // The cached token, or the last seen error.
    token: Arc<Mutex<Result<Token>>>,

    // Tracks if a refresh is ongoing. If the lock is held, there is a refresh.
    refresh_in_progress: Arc<Mutex<()>>,
    // Allows us to await the result of a refresh in multiple tasks.
    refresh_notify: Arc<Notify>,

    // The token provider. This thing does the refreshing.
    inner: Arc<T>,
}

// Returns true if we are holding an error, or a token that is expired or
// about to expire.
fn stale(token: &Result<Token>) -> bool {
    match token {
        Ok(t) => t
            .expires_at
            .is_some_and(|e| e <= Instant::now() + TOKEN_REFRESH_SLACK),
        Err(_) => true,
    }
}

// We manually implement the `Clone` trait because the Rust compiler will
// squawk if `T` is not `Clone`, even though we only hold an `Arc<T>`.
impl<T: TokenProvider> Clone for TokenCache<T> {
    fn clone(&self) -> TokenCache<T> {
        TokenCache {
            token: self.token.clone(),
            refresh_in_progress: self.refresh_in_progress.clone(),
            refresh_notify: self.refresh_notify.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: TokenProvider> TokenCache<T> {
    pub(crate) fn new(inner: T) -> TokenCache<T> {
        Self::with_cached(
            Err(errors::retryable_from_str("no token in the cache")),
            inner,
        )
    }

    /// Creates a cache already holding `initial`. The inner provider is only
    /// consulted once `initial` goes stale.
    pub(crate) fn with_initial_token(initial: Token, inner: T) -> TokenCache<T> {
        Self::with_cached(Ok(initial), inner)
    }

    fn with_cached(cached: Result<Token>, inner: T) -> TokenCache<T> {
        TokenCache {
            token: Arc::new(Mutex::new(cached)),
            refresh_in_progress: Arc::new(Mutex::new(())),
            refresh_notify: Arc::new(Notify::new()),
            inner: Arc::new(inner),
        }
    }

    // Clones the current value, in a thread-safe manner. Releases the lock on
    // return.
    async fn current_token(&self) -> Result<Token> {
        self.token.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl<T: TokenProvider + 'static> TokenProvider for TokenCache<T> {
    async fn token(&self) -> Result<Token> {
        let token = self.current_token().await;

        if !stale(&token) {
            return token;
        }

        match self.refresh_in_progress.try_lock() {
            // Check if there are any outstanding refreshes...
            Ok(guard) => {
                // No refreshes. We should start one.
                let token = self.inner.token().await;

                // Store the token, or an updated error.
                *self.token.lock().await = token.clone();

                // The refresh is complete. Release the refresh guard.
                drop(guard);

                // Notify any and all waiters.
                self.refresh_notify.notify_waiters();

                // Return here without asking for the token lock again.
                return token;
            }
            Err(_) => {
                // There is already a refresh. We will await its result.
                self.refresh_notify.notified().await;
            }
        }

        // The refresh operation has completed. We should have a new
        // error/token. Return it.
        self.current_token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CredentialsError;
    use crate::token::tests::MockTokenProvider;
    use std::time::Duration;

    static TOKEN_VALID_DURATION: Duration = Duration::from_secs(3600);

    fn test_token(value: &str, expires_in: Option<Duration>) -> Token {
        Token {
            token: value.to_string(),
            token_type: "Bearer".to_string(),
            expires_at: expires_in.map(|d| Instant::now() + d),
        }
    }

    #[tokio::test]
    async fn initial_token_success() {
        let expected = test_token("test-token", None);
        let expected_clone = expected.clone();

        let mut mock = MockTokenProvider::new();
        mock.expect_token()
            .times(1)
            .return_once(|| Ok(expected_clone));

        let cache = TokenCache::new(mock);
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, expected);

        // Verify that we use the cached token instead of making a new request
        // to the mock token provider.
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn initial_token_failure() {
        let mut mock = MockTokenProvider::new();
        mock.expect_token()
            .times(2)
            .returning(|| Err(CredentialsError::from_msg(false, "fail")));

        let cache = TokenCache::new(mock);
        assert!(cache.token().await.is_err());

        // Verify that a new request is made to the mock token provider when
        // we don't have a valid token.
        assert!(cache.token().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn token_cached_above_refresh_slack() {
        let initial = test_token("initial-token", Some(TOKEN_VALID_DURATION));
        let initial_clone = initial.clone();

        let mut mock = MockTokenProvider::new();
        mock.expect_token()
            .times(1)
            .return_once(|| Ok(initial_clone));
        mock.expect_token()
            .times(1)
            .return_once(|| Err(CredentialsError::from_msg(true, "refresh attempted")));

        let cache = TokenCache::new(mock);
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, initial);

        // With 61 seconds of lifetime left the token is still served from
        // the cache.
        tokio::time::advance(TOKEN_VALID_DURATION - Duration::from_secs(61)).await;
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, initial);

        // Two seconds later only 59 seconds remain, which is inside the
        // refresh slack, and the provider is consulted again.
        tokio::time::advance(Duration::from_secs(2)).await;
        let err = cache.token().await.unwrap_err();
        assert!(format!("{err}").contains("refresh attempted"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn token_refreshed_at_refresh_slack() {
        let initial = test_token("initial-token", Some(TOKEN_VALID_DURATION));
        let initial_clone = initial.clone();
        let refreshed = test_token("refreshed-token", Some(2 * TOKEN_VALID_DURATION));
        let refreshed_clone = refreshed.clone();

        let mut mock = MockTokenProvider::new();
        mock.expect_token()
            .times(1)
            .return_once(|| Ok(initial_clone));
        mock.expect_token()
            .times(1)
            .return_once(|| Ok(refreshed_clone));

        let cache = TokenCache::new(mock);
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, initial);

        // Exactly 60 seconds of lifetime left: the token counts as stale.
        tokio::time::advance(TOKEN_VALID_DURATION - Duration::from_secs(60)).await;
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, refreshed);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_failure_then_recovery() {
        let initial = test_token("initial-token", Some(TOKEN_VALID_DURATION));
        let initial_clone = initial.clone();
        let refreshed = test_token("refreshed-token", Some(2 * TOKEN_VALID_DURATION));
        let refreshed_clone = refreshed.clone();

        let mut mock = MockTokenProvider::new();
        mock.expect_token()
            .times(1)
            .return_once(|| Ok(initial_clone));
        mock.expect_token()
            .times(1)
            .return_once(|| Err(CredentialsError::from_msg(true, "fail")));
        mock.expect_token()
            .times(1)
            .return_once(|| Ok(refreshed_clone));

        let cache = TokenCache::new(mock);
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, initial);

        // Wait long enough for the token to be expired. The fetch fails, and
        // we return the error rather than the expired token.
        tokio::time::advance(TOKEN_VALID_DURATION).await;
        assert!(cache.token().await.is_err());

        // A failed fetch does not poison the cache: the next caller retries.
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, refreshed);
    }

    #[tokio::test]
    async fn seeded_cache_serves_initial_token_without_provider() {
        let initial = test_token("seeded-token", Some(TOKEN_VALID_DURATION));

        // No expectations: consulting the provider would panic.
        let mock = MockTokenProvider::new();

        let cache = TokenCache::with_initial_token(initial.clone(), mock);
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, initial);
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_cache_consults_provider_once_stale() {
        let initial = test_token("seeded-token", Some(TOKEN_VALID_DURATION));

        let mut mock = MockTokenProvider::new();
        mock.expect_token()
            .times(1)
            .return_once(|| Err(CredentialsError::from_msg(false, "cannot refresh")));

        let cache = TokenCache::with_initial_token(initial.clone(), mock);
        let actual = cache.token().await.unwrap();
        assert_eq!(actual, initial);

        tokio::time::advance(TOKEN_VALID_DURATION).await;
        let err = cache.token().await.unwrap_err();
        assert!(format!("{err}").contains("cannot refresh"), "{err}");
    }

    #[derive(Clone, Debug)]
    struct FakeTokenProvider {
        result: Result<Token>,
        calls: Arc<std::sync::Mutex<i32>>,
    }

    impl FakeTokenProvider {
        pub fn new(result: Result<Token>) -> Self {
            FakeTokenProvider {
                result,
                calls: Arc::new(std::sync::Mutex::new(0)),
            }
        }

        pub fn calls(&self) -> i32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl TokenProvider for FakeTokenProvider {
        async fn token(&self) -> Result<Token> {
            // Release a token periodically. We give enough time for the
            // waiters in a thundering herd to pile up.
            tokio::time::sleep(Duration::from_millis(50)).await;

            // Track how many calls were made to the inner token provider.
            *self.calls.lock().unwrap() += 1;

            // Return the result.
            self.result.clone()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn initial_token_thundering_herd_success() {
        let token = test_token("initial-token", None);

        let tp = FakeTokenProvider::new(Ok(token.clone()));

        let cache = TokenCache::new(tp.clone());

        // Spawn N tasks, all asking for a token at once.
        let tasks = (0..100)
            .map(|_| {
                let cache_clone = cache.clone();
                tokio::spawn(async move { cache_clone.token().await })
            })
            .collect::<Vec<_>>();

        // Wait for the N token requests to complete, verifying the returned
        // token.
        for task in tasks {
            let actual = task.await.unwrap();
            assert!(actual.is_ok(), "{}", actual.err().unwrap());
            assert_eq!(actual.unwrap(), token);
        }

        // Given the N requests to the token cache, we expect that not all N
        // requests were passed along to the inner token provider. The
        // expectation is loose, to avoid races between spawning the tasks and
        // executing the first line of code in the task. In most cases, there
        // should be 1 call to the inner token provider.
        let calls = tp.calls();
        assert!(calls < 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn initial_token_thundering_herd_failure_shares_error() {
        let err = Err(CredentialsError::from_msg(false, "epic fail"));

        let tp = FakeTokenProvider::new(err);

        let cache = TokenCache::new(tp.clone());

        // Spawn N tasks, all asking for a token at once.
        let tasks = (0..100)
            .map(|_| {
                let cache_clone = cache.clone();
                tokio::spawn(async move { cache_clone.token().await })
            })
            .collect::<Vec<_>>();

        // Wait for the N token requests to complete, verifying the returned
        // error.
        for task in tasks {
            let actual = task.await.unwrap();
            assert!(actual.is_err(), "{:?}", actual.unwrap());
            let e = format!("{}", actual.err().unwrap());
            assert!(e.contains("epic fail"), "{e}");
        }

        let calls = tp.calls();
        assert!(calls < 100);
    }
}
