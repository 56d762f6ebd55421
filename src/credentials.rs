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

//! Types and functions to work with credentials.

/// Service account impersonation credentials.
pub mod impersonated;

/// Credentials backed by remotely signed JWT assertions.
pub mod signed_jwt;

/// Credentials wrapping a token issued out-of-band.
pub mod static_token;

use crate::Result;
use crate::errors;
use crate::token::{Token, instant_from_epoch_seconds};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Represents a [Credential] used to obtain auth tokens and the headers
/// that attach them to outbound requests. This is the type consumed by HTTP
/// clients: they do not care how the token is produced, only that one can be
/// produced on demand.
///
/// # Example: attaching credentials to a request
/// ```no_run
/// # use gcp_iam_auth::credentials::impersonated;
/// # tokio_test::block_on(async {
/// let credentials = impersonated::Builder::new("my-sa@my-project.iam.gserviceaccount.com")
///     .with_scopes(["https://www.googleapis.com/auth/cloud-platform"])
///     .build()?;
///
/// let client = reqwest::Client::new();
/// let response = client
///     .get("https://example.googleapis.com/v1/things")
///     .headers(credentials.headers().await?)
///     .send()
///     .await?;
/// # Ok::<(), anyhow::Error>(())
/// # });
/// ```
///
/// [Credential]: https://cloud.google.com/docs/authentication#credentials
#[derive(Clone, Debug)]
pub struct Credentials {
    pub(crate) inner: Arc<dyn dynamic::CredentialsProvider>,
}

impl<T> From<T> for Credentials
where
    T: CredentialsProvider + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl Credentials {
    /// Asynchronously constructs the auth headers for an outbound request.
    ///
    /// Returns the `Authorization` header, plus the quota project header when
    /// the credentials carry a quota project. A cached token is reused while
    /// usable; otherwise a fresh one is fetched first.
    pub async fn headers(&self) -> Result<HeaderMap> {
        self.inner.headers().await
    }

    /// Asynchronously retrieves a token.
    ///
    /// Returns the cached token if one is present and not about to expire.
    pub async fn token(&self) -> Result<Token> {
        self.inner.token().await
    }
}

/// A trait for types that can provide auth tokens and headers.
///
/// Implement this trait to create a custom credentials provider, for example
/// when working with an authentication system not supported by this crate,
/// or to mock credentials in tests.
pub trait CredentialsProvider: std::fmt::Debug {
    /// Asynchronously constructs the auth headers for an outbound request.
    fn headers(&self) -> impl Future<Output = Result<HeaderMap>> + Send;

    /// Asynchronously retrieves a token.
    fn token(&self) -> impl Future<Output = Result<Token>> + Send;
}

/// A module containing the dynamically-typed, dyn-compatible version of the
/// `CredentialsProvider` trait. This is an internal implementation detail.
pub(crate) mod dynamic {
    use crate::Result;
    use crate::token::Token;
    use http::HeaderMap;

    /// A dyn-compatible, crate-private version of `CredentialsProvider`.
    #[async_trait::async_trait]
    pub trait CredentialsProvider: Send + Sync + std::fmt::Debug {
        /// Asynchronously constructs the auth headers for an outbound
        /// request.
        async fn headers(&self) -> Result<HeaderMap>;

        /// Asynchronously retrieves a token.
        async fn token(&self) -> Result<Token>;
    }

    /// Every public `CredentialsProvider` implements the dyn-compatible
    /// `CredentialsProvider`.
    #[async_trait::async_trait]
    impl<T> CredentialsProvider for T
    where
        T: super::CredentialsProvider + Send + Sync,
    {
        async fn headers(&self) -> Result<HeaderMap> {
            T::headers(self).await
        }

        async fn token(&self) -> Result<Token> {
            T::token(self).await
        }
    }
}

/// The full resource name of a service account, as expected by the token
/// issuance API. The `-` wildcard stands for the project owning the account.
pub(crate) fn service_account_path(principal: &str) -> String {
    format!("projects/-/serviceAccounts/{principal}")
}

/// Converts a delegation chain into resource-name form, preserving order.
///
/// Callers must omit the field from outbound requests when the chain is
/// empty; the backend rejects empty repeated fields.
pub(crate) fn delegate_paths(delegates: &[String]) -> Vec<String> {
    delegates
        .iter()
        .map(|principal| service_account_path(principal))
        .collect()
}

/// Parses a compact JWT as a [Token], deriving the expiration from the
/// token's own `exp` claim.
///
/// The signature is not verified: the tokens handled here were just obtained
/// from a trusted first-party signer, and the issuance response carries no
/// separate expiry field for them.
pub(crate) fn parse_id_token(token: String) -> Result<Token> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(errors::non_retryable_from_str(
            "malformed JWT, expected three dot-separated segments",
        ));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(errors::non_retryable)?;

    let claims: HashMap<String, Value> =
        serde_json::from_slice(&payload).map_err(errors::non_retryable)?;

    let expires_at = claims
        .get("exp")
        .and_then(Value::as_u64)
        .ok_or_else(|| errors::non_retryable_from_str("the JWT is missing a numeric `exp` claim"))
        .map(instant_from_epoch_seconds)?;

    Ok(Token {
        token,
        token_type: "Bearer".to_string(),
        expires_at,
    })
}
