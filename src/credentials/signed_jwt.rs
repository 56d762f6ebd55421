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

//! Credentials backed by remotely signed JWT assertions.
//!
//! These credentials build a JWT claim set locally and ask the backend to
//! sign it on behalf of a service account. The signed assertion is the
//! bearer token: no private key material ever exists in this process. This
//! is useful for services that accept self-issued JWTs directly, skipping a
//! token exchange round trip.
//!
//! The principal authorizing the signing call must have token creation
//! rights on the target service account.
//!
//! ## Example
//!
//! ```no_run
//! # use gcp_iam_auth::credentials::signed_jwt;
//! # tokio_test::block_on(async {
//! let credentials = signed_jwt::Builder::new(
//!     "my-sa@my-project.iam.gserviceaccount.com",
//!     "https://my-service.example.com",
//! )
//! .build()?;
//! let headers = credentials.headers().await?;
//! # Ok::<(), anyhow::Error>(())
//! # });
//! ```

use crate::build_errors::Error as BuilderError;
use crate::constants::{DEFAULT_LIFETIME, IAM_CREDENTIALS_ENDPOINT};
use crate::credentials::{
    Credentials, delegate_paths, dynamic, parse_id_token, service_account_path,
};
use crate::errors::{self, CredentialsError};
use crate::headers_util::{
    SIGN_JWT_REQUEST_TYPE, X_GOOG_API_CLIENT, build_bearer_headers, metrics_header_value,
};
use crate::token::{Token, TokenProvider};
use crate::token_cache::TokenCache;
use crate::{BuildResult, Result};
use async_trait::async_trait;
use http::HeaderMap;
use reqwest::Client;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(crate) const SIGNED_JWT_CREDENTIAL_TYPE: &str = "sjwt";

/// A builder for signed JWT [Credentials].
///
/// # Example
/// ```
/// # use gcp_iam_auth::credentials::signed_jwt::Builder;
/// let credentials = Builder::new(
///     "my-sa@my-project.iam.gserviceaccount.com",
///     "https://my-service.example.com",
/// )
/// .with_lifetime(std::time::Duration::from_secs(600))
/// .build();
/// ```
///
/// [Credentials]: crate::credentials::Credentials
pub struct Builder {
    target_principal: String,
    target_audience: String,
    issuer: Option<String>,
    subject: Option<String>,
    lifetime: Option<Duration>,
    delegates: Option<Vec<String>>,
    source_credentials: Option<Credentials>,
    endpoint: String,
}

impl Builder {
    /// Creates a new builder for the given target principal, the email of
    /// the service account that signs the assertions, and the audience the
    /// assertions are intended for.
    pub fn new<P: Into<String>, A: Into<String>>(target_principal: P, target_audience: A) -> Self {
        Self {
            target_principal: target_principal.into(),
            target_audience: target_audience.into(),
            issuer: None,
            subject: None,
            lifetime: None,
            delegates: None,
            source_credentials: None,
            endpoint: IAM_CREDENTIALS_ENDPOINT.to_string(),
        }
    }

    /// Sets the `iss` claim of the assertions. Defaults to the target
    /// principal.
    pub fn with_issuer<S: Into<String>>(mut self, issuer: S) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Sets the `sub` claim of the assertions. Defaults to the target
    /// principal.
    pub fn with_subject<S: Into<String>>(mut self, subject: S) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the lifetime of the assertions, the distance between their
    /// `iat` and `exp` claims. Defaults to one hour.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Sets the chain of delegates, as plain service account emails.
    ///
    /// Each delegate must be able to impersonate the next one in the chain,
    /// and the last one must be able to impersonate the target principal. An
    /// empty chain is equivalent to not setting one.
    pub fn with_delegates<I, S>(mut self, delegates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.delegates = Some(delegates.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Sets the credentials that authorize the signing calls.
    ///
    /// When unset, the signing requests are sent without an `Authorization`
    /// header and the surrounding environment must authorize them.
    pub fn with_source_credentials(mut self, source_credentials: Credentials) -> Self {
        self.source_credentials = Some(source_credentials);
        self
    }

    /// Overrides the token issuance endpoint, e.g. when routing through a
    /// regional or private endpoint.
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Returns a [Credentials] instance with the configured settings.
    ///
    /// # Errors
    ///
    /// Returns a [BuilderError] if `target_principal` or `target_audience`
    /// is empty.
    ///
    /// [Credentials]: crate::credentials::Credentials
    pub fn build(self) -> BuildResult<Credentials> {
        let token_provider = self.build_token_provider()?;
        Ok(Credentials {
            inner: Arc::new(SignedJwtCredentials {
                token_provider: TokenCache::new(token_provider),
            }),
        })
    }

    fn build_token_provider(self) -> BuildResult<SignedJwtTokenProvider> {
        if self.target_principal.is_empty() {
            return Err(BuilderError::missing_field("target_principal"));
        }
        if self.target_audience.is_empty() {
            return Err(BuilderError::missing_field("target_audience"));
        }
        let issuer = self
            .issuer
            .unwrap_or_else(|| self.target_principal.clone());
        let subject = self
            .subject
            .unwrap_or_else(|| self.target_principal.clone());
        let delegates = self.delegates.filter(|d| !d.is_empty());
        Ok(SignedJwtTokenProvider {
            source_credentials: self.source_credentials,
            target: service_account_path(&self.target_principal),
            delegates: delegates.map(|d| delegate_paths(&d)),
            audience: self.target_audience,
            issuer,
            subject,
            lifetime: self.lifetime.unwrap_or(DEFAULT_LIFETIME),
            endpoint: self.endpoint,
        })
    }
}

struct SignedJwtCredentials<T>
where
    T: TokenProvider,
{
    token_provider: T,
}

impl<T> Debug for SignedJwtCredentials<T>
where
    T: TokenProvider,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedJwtCredentials")
            .field("token_provider", &self.token_provider)
            .finish()
    }
}

#[async_trait]
impl<T> dynamic::CredentialsProvider for SignedJwtCredentials<T>
where
    T: TokenProvider + 'static,
{
    async fn headers(&self) -> Result<HeaderMap> {
        let token = self.token_provider.token().await?;
        build_bearer_headers(&token, &None)
    }

    async fn token(&self) -> Result<Token> {
        self.token_provider.token().await
    }
}

struct SignedJwtTokenProvider {
    source_credentials: Option<Credentials>,
    target: String,
    delegates: Option<Vec<String>>,
    audience: String,
    issuer: String,
    subject: String,
    lifetime: Duration,
    endpoint: String,
}

impl SignedJwtTokenProvider {
    fn claims(&self, now: u64) -> JwtClaims<'_> {
        JwtClaims {
            aud: &self.audience,
            iat: now,
            exp: now + self.lifetime.as_secs(),
            iss: &self.issuer,
            sub: &self.subject,
        }
    }
}

impl Debug for SignedJwtTokenProvider {
    // The source credentials never appear here, not even in redacted form.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedJwtTokenProvider")
            .field("target", &self.target)
            .field("delegates", &self.delegates)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("subject", &self.subject)
            .field("lifetime", &self.lifetime)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl TokenProvider for SignedJwtTokenProvider {
    async fn token(&self) -> Result<Token> {
        let source_headers = match &self.source_credentials {
            Some(credentials) => credentials.headers().await?,
            None => HeaderMap::new(),
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(errors::non_retryable)?
            .as_secs();
        let payload =
            serde_json::to_string(&self.claims(now)).map_err(errors::non_retryable)?;

        let url = format!("{}/v1/{}:signJwt", self.endpoint, self.target);
        sign_jwt(source_headers, self.delegates.clone(), payload, &url).await
    }
}

/// The claim set sent for signing. Field order is the serialization order.
#[derive(serde::Serialize, Debug, PartialEq)]
struct JwtClaims<'a> {
    aud: &'a str,
    iat: u64,
    exp: u64,
    iss: &'a str,
    sub: &'a str,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
struct SignJwtRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    delegates: Option<Vec<String>>,
    payload: String,
}

#[derive(serde::Deserialize)]
struct SignJwtResponse {
    #[serde(rename = "signedJwt")]
    signed_jwt: String,
}

async fn sign_jwt(
    source_headers: HeaderMap,
    delegates: Option<Vec<String>>,
    payload: String,
    url: &str,
) -> Result<Token> {
    let client = Client::new();
    let body = SignJwtRequest { delegates, payload };

    let response = client
        .post(url)
        .header("Content-Type", "application/json")
        .header(
            X_GOOG_API_CLIENT,
            metrics_header_value(SIGN_JWT_REQUEST_TYPE, SIGNED_JWT_CREDENTIAL_TYPE),
        )
        .headers(source_headers)
        .json(&body)
        .send()
        .await
        .map_err(errors::from_http_error)?;

    if !response.status().is_success() {
        return Err(errors::from_http_response(response).await);
    }

    let token_response = response.json::<SignJwtResponse>().await.map_err(|e| {
        let retryable = !e.is_decode();
        CredentialsError::from_source(retryable, e)
    })?;

    // Read the expiry back from the claims the backend actually signed. In
    // practice they are the claims we just sent, but the signed token is the
    // authoritative record.
    parse_id_token(token_response.signed_jwt)
}
