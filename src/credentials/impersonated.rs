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

//! Service account impersonation credentials.
//!
//! When the principal you are using doesn't have the permissions you need to
//! accomplish your task, or you want to use a service account in a
//! development environment, you can use service account impersonation: the
//! caller's own credentials are exchanged for a token minted for the target
//! service account, optionally through a chain of intermediate delegates.
//! The principal authorizing the exchange must have token creation rights on
//! the target service account.
//!
//! One builder produces two kinds of credentials, decided by which option is
//! set:
//!
//! - [with_scopes][Builder::with_scopes] requests OAuth2 access tokens for
//!   the given scopes;
//! - [with_target_audience][Builder::with_target_audience] requests OIDC ID
//!   tokens for the given audience.
//!
//! Exactly one of the two must be chosen, and the remaining options are
//! checked against that choice when the credentials are built, before any
//! network call is made.
//!
//! ## Example: access tokens for a target service account
//!
//! ```no_run
//! # use gcp_iam_auth::credentials::impersonated;
//! # tokio_test::block_on(async {
//! let credentials = impersonated::Builder::new("my-sa@my-project.iam.gserviceaccount.com")
//!     .with_scopes(["https://www.googleapis.com/auth/cloud-platform"])
//!     .build()?;
//! let headers = credentials.headers().await?;
//! # Ok::<(), anyhow::Error>(())
//! # });
//! ```
//!
//! ## Example: ID tokens through a delegation chain
//!
//! ```no_run
//! # use gcp_iam_auth::credentials::impersonated;
//! # tokio_test::block_on(async {
//! let credentials = impersonated::Builder::new("my-sa@my-project.iam.gserviceaccount.com")
//!     .with_target_audience("https://my-service.example.com")
//!     .with_delegates(["first@my-project.iam.gserviceaccount.com"])
//!     .with_include_email(true)
//!     .build()?;
//! let id_token = credentials.token().await?;
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
    ACCESS_TOKEN_REQUEST_TYPE, ID_TOKEN_REQUEST_TYPE, X_GOOG_API_CLIENT, build_bearer_headers,
    metrics_header_value,
};
use crate::token::{Token, TokenProvider};
use crate::token_cache::TokenCache;
use crate::{BuildResult, Result};
use async_trait::async_trait;
use http::HeaderMap;
use reqwest::Client;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

pub(crate) const IMPERSONATED_CREDENTIAL_TYPE: &str = "imp";

/// A builder for impersonated service account [Credentials].
///
/// # Example
/// ```
/// # use gcp_iam_auth::credentials::impersonated::Builder;
/// let credentials = Builder::new("my-sa@my-project.iam.gserviceaccount.com")
///     .with_scopes(["https://www.googleapis.com/auth/cloud-platform"])
///     .with_lifetime(std::time::Duration::from_secs(120))
///     .build();
/// ```
///
/// [Credentials]: crate::credentials::Credentials
pub struct Builder {
    target_principal: String,
    source_credentials: Option<Credentials>,
    delegates: Option<Vec<String>>,
    scopes: Option<Vec<String>>,
    target_audience: Option<String>,
    include_email: Option<bool>,
    lifetime: Option<Duration>,
    quota_project_id: Option<String>,
    endpoint: String,
}

impl Builder {
    /// Creates a new builder for the given target principal, the email of
    /// the service account to impersonate.
    pub fn new<S: Into<String>>(target_principal: S) -> Self {
        Self {
            target_principal: target_principal.into(),
            source_credentials: None,
            delegates: None,
            scopes: None,
            target_audience: None,
            include_email: None,
            lifetime: None,
            quota_project_id: None,
            endpoint: IAM_CREDENTIALS_ENDPOINT.to_string(),
        }
    }

    /// Sets the credentials that authorize the token minting calls.
    ///
    /// This principal needs token creation rights on the target service
    /// account (or on the first delegate, when a delegation chain is used).
    /// When unset, the minting requests are sent without an `Authorization`
    /// header and the surrounding environment must authorize them.
    pub fn with_source_credentials(mut self, source_credentials: Credentials) -> Self {
        self.source_credentials = Some(source_credentials);
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

    /// Requests access tokens with the given [scopes].
    ///
    /// Setting scopes selects access token credentials; it cannot be
    /// combined with [with_target_audience][Builder::with_target_audience].
    ///
    /// [scopes]: https://developers.google.com/identity/protocols/oauth2/scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Requests OIDC ID tokens for the given audience.
    ///
    /// Setting an audience selects ID token credentials; it cannot be
    /// combined with [with_scopes][Builder::with_scopes] or
    /// [with_lifetime][Builder::with_lifetime].
    pub fn with_target_audience<S: Into<String>>(mut self, target_audience: S) -> Self {
        self.target_audience = Some(target_audience.into());
        self
    }

    /// Requests that the service account email is included as a claim of
    /// the minted ID tokens. Only valid for ID token credentials.
    pub fn with_include_email(mut self, include_email: bool) -> Self {
        self.include_email = Some(include_email);
        self
    }

    /// Sets the lifetime of the minted access tokens. Defaults to one hour.
    /// Only valid for access token credentials; ID tokens carry their own
    /// expiry.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// Sets the [quota project] for these credentials.
    ///
    /// For some services, you can use an account in one project for
    /// authentication and authorization, and charge the usage to a different
    /// project. This requires that the target service account has
    /// `serviceusage.services.use` permissions on the quota project. The
    /// quota project is attached to outbound request headers; it plays no
    /// role in the token minting calls.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.quota_project_id = Some(quota_project_id.into());
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
    /// Returns a [BuilderError] if the combination of options is not legal:
    /// - neither `scopes` nor `target_audience` is set, or both are;
    /// - `include_email` is set without `target_audience`;
    /// - `lifetime` is set together with `target_audience`.
    ///
    /// An empty scope list and an empty delegation chain count as unset.
    ///
    /// [Credentials]: crate::credentials::Credentials
    pub fn build(self) -> BuildResult<Credentials> {
        if self.target_principal.is_empty() {
            return Err(BuilderError::missing_field("target_principal"));
        }
        let scopes = self.scopes.filter(|s| !s.is_empty());
        let delegates = self.delegates.filter(|d| !d.is_empty());

        let mode = match (scopes, self.target_audience) {
            (Some(_), Some(_)) => {
                return Err(BuilderError::invalid_configuration(
                    "`scopes` and `target_audience` are mutually exclusive: \
                     request either an access token or an ID token",
                ));
            }
            (None, None) => {
                return Err(BuilderError::invalid_configuration(
                    "one of `scopes` or `target_audience` is required",
                ));
            }
            (Some(scopes), None) => {
                if self.include_email.is_some() {
                    return Err(BuilderError::invalid_configuration(
                        "`include_email` requires `target_audience`: \
                         it only applies to ID tokens",
                    ));
                }
                ImpersonationMode::AccessToken {
                    scopes,
                    lifetime: self.lifetime.unwrap_or(DEFAULT_LIFETIME),
                }
            }
            (None, Some(audience)) => {
                if self.lifetime.is_some() {
                    return Err(BuilderError::invalid_configuration(
                        "`lifetime` cannot be combined with `target_audience`: \
                         ID tokens carry their own expiry",
                    ));
                }
                ImpersonationMode::IdToken {
                    audience,
                    include_email: self.include_email,
                }
            }
        };

        let token_provider = ImpersonatedTokenProvider {
            source_credentials: self.source_credentials,
            target: service_account_path(&self.target_principal),
            delegates: delegates.map(|d| delegate_paths(&d)),
            mode,
            endpoint: self.endpoint,
        };
        Ok(Credentials {
            inner: Arc::new(ImpersonatedCredentials {
                token_provider: TokenCache::new(token_provider),
                quota_project_id: self.quota_project_id,
            }),
        })
    }
}

#[derive(Debug)]
enum ImpersonationMode {
    AccessToken {
        scopes: Vec<String>,
        lifetime: Duration,
    },
    IdToken {
        audience: String,
        include_email: Option<bool>,
    },
}

#[derive(Debug)]
struct ImpersonatedCredentials<T>
where
    T: TokenProvider,
{
    token_provider: T,
    quota_project_id: Option<String>,
}

#[async_trait]
impl<T> dynamic::CredentialsProvider for ImpersonatedCredentials<T>
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

struct ImpersonatedTokenProvider {
    source_credentials: Option<Credentials>,
    target: String,
    delegates: Option<Vec<String>>,
    mode: ImpersonationMode,
    endpoint: String,
}

impl Debug for ImpersonatedTokenProvider {
    // The source credentials never appear here, not even in redacted form.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("ImpersonatedTokenProvider");
        debug
            .field("target", &self.target)
            .field("delegates", &self.delegates);
        match &self.mode {
            ImpersonationMode::AccessToken { scopes, lifetime } => {
                debug.field("scopes", scopes).field("lifetime", lifetime)
            }
            ImpersonationMode::IdToken {
                audience,
                include_email,
            } => debug
                .field("target_audience", audience)
                .field("include_email", include_email),
        }
        .field("endpoint", &self.endpoint)
        .finish()
    }
}

#[async_trait]
impl TokenProvider for ImpersonatedTokenProvider {
    async fn token(&self) -> Result<Token> {
        let source_headers = match &self.source_credentials {
            Some(credentials) => credentials.headers().await?,
            None => HeaderMap::new(),
        };
        match &self.mode {
            ImpersonationMode::AccessToken { scopes, lifetime } => {
                let url = format!("{}/v1/{}:generateAccessToken", self.endpoint, self.target);
                generate_access_token(
                    source_headers,
                    self.delegates.clone(),
                    scopes.clone(),
                    *lifetime,
                    &url,
                )
                .await
            }
            ImpersonationMode::IdToken {
                audience,
                include_email,
            } => {
                let url = format!("{}/v1/{}:generateIdToken", self.endpoint, self.target);
                generate_id_token(
                    source_headers,
                    self.delegates.clone(),
                    audience.clone(),
                    *include_email,
                    &url,
                )
                .await
            }
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
struct GenerateAccessTokenRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    delegates: Option<Vec<String>>,
    scope: Vec<String>,
    lifetime: String,
}

#[derive(serde::Deserialize)]
struct GenerateAccessTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expireTime")]
    expire_time: String,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
struct GenerateIdTokenRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    delegates: Option<Vec<String>>,
    audience: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "includeEmail")]
    include_email: Option<bool>,
}

#[derive(serde::Deserialize)]
struct GenerateIdTokenResponse {
    token: String,
}

async fn generate_access_token(
    source_headers: HeaderMap,
    delegates: Option<Vec<String>>,
    scopes: Vec<String>,
    lifetime: Duration,
    url: &str,
) -> Result<Token> {
    let client = Client::new();
    let body = GenerateAccessTokenRequest {
        delegates,
        scope: scopes,
        lifetime: format!("{}s", lifetime.as_secs()),
    };

    let response = client
        .post(url)
        .header("Content-Type", "application/json")
        .header(
            X_GOOG_API_CLIENT,
            metrics_header_value(ACCESS_TOKEN_REQUEST_TYPE, IMPERSONATED_CREDENTIAL_TYPE),
        )
        .headers(source_headers)
        .json(&body)
        .send()
        .await
        .map_err(errors::from_http_error)?;

    if !response.status().is_success() {
        return Err(errors::from_http_response(response).await);
    }

    let token_response = response
        .json::<GenerateAccessTokenResponse>()
        .await
        .map_err(|e| {
            let retryable = !e.is_decode();
            CredentialsError::from_source(retryable, e)
        })?;

    let parsed_dt = OffsetDateTime::parse(
        &token_response.expire_time,
        &time::format_description::well_known::Rfc3339,
    )
    .map_err(errors::non_retryable)?;

    let expires_at = match std::time::Duration::try_from(parsed_dt - OffsetDateTime::now_utc()) {
        Ok(remaining) => Instant::now() + remaining,
        // An expiration in the past; the token is unusable immediately.
        Err(_) => Instant::now(),
    };

    Ok(Token {
        token: token_response.access_token,
        token_type: "Bearer".to_string(),
        expires_at: Some(expires_at),
    })
}

async fn generate_id_token(
    source_headers: HeaderMap,
    delegates: Option<Vec<String>>,
    audience: String,
    include_email: Option<bool>,
    url: &str,
) -> Result<Token> {
    let client = Client::new();
    let body = GenerateIdTokenRequest {
        delegates,
        audience,
        include_email,
    };

    let response = client
        .post(url)
        .header("Content-Type", "application/json")
        .header(
            X_GOOG_API_CLIENT,
            metrics_header_value(ID_TOKEN_REQUEST_TYPE, IMPERSONATED_CREDENTIAL_TYPE),
        )
        .headers(source_headers)
        .json(&body)
        .send()
        .await
        .map_err(errors::from_http_error)?;

    if !response.status().is_success() {
        return Err(errors::from_http_response(response).await);
    }

    let token_response = response
        .json::<GenerateIdTokenResponse>()
        .await
        .map_err(|e| {
            let retryable = !e.is_decode();
            CredentialsError::from_source(retryable, e)
        })?;

    // The issuance response carries no expiry for ID tokens; the token
    // itself does.
    parse_id_token(token_response.token)
}
