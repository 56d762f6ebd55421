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

//! Credentials wrapping a token issued out-of-band.
//!
//! Use these credentials when some other system already minted an access
//! token, for example a deployment pipeline that injects short-lived tokens
//! into the environment. The expiration is resolved once, through token
//! introspection, at construction time.
//!
//! These credentials can never mint a new token. Once the wrapped token
//! expires every use fails with an error whose source is
//! [RefreshNotSupported]: the caller must obtain a fresh token from whatever
//! system issued the original one and build new credentials around it.
//!
//! ## Example
//!
//! ```no_run
//! # use gcp_iam_auth::credentials::static_token;
//! # tokio_test::block_on(async {
//! let credentials = static_token::Builder::new("ya29.pre-issued-token")
//!     .with_quota_project_id("my-billing-project")
//!     .build()
//!     .await?;
//! let headers = credentials.headers().await?;
//! # Ok::<(), anyhow::Error>(())
//! # });
//! ```
//!
//! [RefreshNotSupported]: crate::errors::RefreshNotSupported

use crate::Result;
use crate::constants::TOKEN_INFO_ENDPOINT;
use crate::credentials::{Credentials, dynamic::CredentialsProvider};
use crate::errors::{CredentialsError, RefreshNotSupported};
use crate::headers_util::build_bearer_headers;
use crate::token::{Redacted, Token, TokenProvider};
use crate::token_cache::TokenCache;
use crate::token_info::TokenInfo;
use http::HeaderMap;
use std::sync::Arc;
use tokio::time::Instant;

/// A builder for static token [Credentials].
///
/// [Credentials]: crate::credentials::Credentials
pub struct Builder {
    token: String,
    quota_project_id: Option<String>,
    token_info_endpoint: String,
}

impl Builder {
    /// Creates a new builder wrapping a pre-issued access token.
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
            quota_project_id: None,
            token_info_endpoint: TOKEN_INFO_ENDPOINT.to_string(),
        }
    }

    /// Sets the [quota project] for these credentials.
    ///
    /// For some services, you can use an account in one project for
    /// authentication and authorization, and charge the usage to a different
    /// project.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.quota_project_id = Some(quota_project_id.into());
        self
    }

    /// Overrides the token introspection endpoint, e.g. when routing through
    /// a proxy.
    pub fn with_token_info_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.token_info_endpoint = endpoint.into();
        self
    }

    /// Returns a [Credentials] instance wrapping the provided token.
    ///
    /// The expiration of the token is resolved immediately through token
    /// introspection, so this method makes a network call and its errors are
    /// the runtime [CredentialsError] type, not a builder error.
    ///
    /// [Credentials]: crate::credentials::Credentials
    pub async fn build(self) -> Result<Credentials> {
        let info =
            TokenInfo::lookup_from_endpoint(&self.token, &self.token_info_endpoint).await?;
        let expires_at = info.expires_at();
        let token = Token {
            token: self.token,
            token_type: "Bearer".to_string(),
            expires_at: Some(expires_at),
        };
        Ok(Credentials {
            inner: Arc::new(StaticTokenCredentials {
                token_provider: TokenCache::with_initial_token(token, StaticTokenProvider),
                quota_project_id: self.quota_project_id,
                expires_at,
            }),
        })
    }
}

/// The acquisition hook for a token nobody can re-acquire.
#[derive(Debug)]
struct StaticTokenProvider;

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<Token> {
        Err(CredentialsError::from_source(false, RefreshNotSupported))
    }
}

struct StaticTokenCredentials<T>
where
    T: TokenProvider,
{
    token_provider: T,
    quota_project_id: Option<String>,
    expires_at: Instant,
}

impl<T> std::fmt::Debug for StaticTokenCredentials<T>
where
    T: TokenProvider,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenCredentials")
            .field("token", &Redacted)
            .field("expires_at", &self.expires_at)
            .field("quota_project_id", &self.quota_project_id)
            .finish()
    }
}

#[async_trait::async_trait]
impl<T> CredentialsProvider for StaticTokenCredentials<T>
where
    T: TokenProvider + 'static,
{
    async fn headers(&self) -> Result<HeaderMap> {
        let token = self.token_provider.token().await?;
        build_bearer_headers(&token, &self.quota_project_id)
    }

    async fn token(&self) -> Result<Token> {
        self.token_provider.token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::find_source_error;
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use serde_json::json;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    type TestResult = anyhow::Result<()>;

    fn future_epoch_seconds(from_now: Duration) -> u64 {
        (SystemTime::now().duration_since(UNIX_EPOCH).unwrap() + from_now).as_secs()
    }

    fn tokeninfo_server(exp: u64) -> Server {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/tokeninfo"),
                request::query(url_decoded(contains(("access_token", "test-static-token")))),
            ])
            .respond_with(json_encoded(json!({
                "exp": exp.to_string(),
                "expires_in": "3600",
            }))),
        );
        server
    }

    #[tokio::test]
    async fn build_resolves_expiry_and_serves_token() -> TestResult {
        let exp = future_epoch_seconds(Duration::from_secs(3600));
        let server = tokeninfo_server(exp);

        let credentials = Builder::new("test-static-token")
            .with_quota_project_id("test-project")
            .with_token_info_endpoint(server.url("/tokeninfo").to_string())
            .build()
            .await?;

        let token = credentials.token().await?;
        assert_eq!(token.token, "test-static-token");
        assert_eq!(token.token_type, "Bearer");
        let remaining = token.expires_at.unwrap() - Instant::now();
        assert!(remaining > Duration::from_secs(3500), "{remaining:?}");

        let headers = credentials.headers().await?;
        assert_eq!(
            headers.get("authorization").unwrap(),
            "Bearer test-static-token"
        );
        assert_eq!(
            headers.get("x-goog-user-project").unwrap(),
            "test-project"
        );

        Ok(())
    }

    #[tokio::test]
    async fn repeated_use_does_not_change_the_token() -> TestResult {
        let exp = future_epoch_seconds(Duration::from_secs(3600));
        let server = tokeninfo_server(exp);

        let credentials = Builder::new("test-static-token")
            .with_token_info_endpoint(server.url("/tokeninfo").to_string())
            .build()
            .await?;

        let first = credentials.token().await?;
        let second = credentials.token().await?;
        assert_eq!(first, second);

        Ok(())
    }

    #[tokio::test]
    async fn expired_token_fails_with_refresh_not_supported() -> TestResult {
        // The introspection response places the expiration within the
        // refresh slack, so the very first use must attempt a refresh.
        let exp = future_epoch_seconds(Duration::from_secs(30));
        let server = tokeninfo_server(exp);

        let credentials = Builder::new("test-static-token")
            .with_token_info_endpoint(server.url("/tokeninfo").to_string())
            .build()
            .await?;

        let err = credentials.token().await.unwrap_err();
        assert!(!err.is_transient(), "{err}");
        assert!(
            find_source_error::<RefreshNotSupported>(&err).is_some(),
            "{err}"
        );

        // And it keeps failing the same way, no matter how often it is
        // called.
        let err = credentials.headers().await.unwrap_err();
        assert!(
            find_source_error::<RefreshNotSupported>(&err).is_some(),
            "{err}"
        );

        Ok(())
    }

    #[tokio::test]
    async fn build_propagates_lookup_failure() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/tokeninfo"))
                .respond_with(status_code(400).body("invalid_token")),
        );

        let err = Builder::new("test-static-token")
            .with_token_info_endpoint(server.url("/tokeninfo").to_string())
            .build()
            .await
            .unwrap_err();

        assert!(!err.is_transient(), "{err}");
    }

    #[tokio::test]
    async fn debug_shows_expiry_and_quota_project_only() -> TestResult {
        let exp = future_epoch_seconds(Duration::from_secs(3600));
        let server = tokeninfo_server(exp);

        let credentials = Builder::new("test-static-token")
            .with_quota_project_id("test-project")
            .with_token_info_endpoint(server.url("/tokeninfo").to_string())
            .build()
            .await?;

        let got = format!("{credentials:?}");
        assert!(!got.contains("test-static-token"), "{got}");
        assert!(got.contains("[censored]"), "{got}");
        assert!(got.contains("expires_at"), "{got}");
        assert!(got.contains("test-project"), "{got}");

        Ok(())
    }
}
