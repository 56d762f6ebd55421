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

//! Remote token introspection.
//!
//! Access tokens are opaque: the only way to learn when one expires is to
//! ask the authorization server that minted it. [TokenInfo::lookup] sends a
//! token to the introspection endpoint and returns the normalized metadata
//! document, most importantly the expiration.

use crate::Result;
use crate::constants::TOKEN_INFO_ENDPOINT;
use crate::errors::{self, CredentialsError};
use crate::token::instant_from_epoch_seconds;
use serde_json::Value;
use std::collections::HashMap;
use tokio::time::Instant;

/// The reason a token introspection call failed.
///
/// Surfaced as the `source()` of the [CredentialsError] returned by
/// [TokenInfo::lookup].
#[derive(thiserror::Error, Debug)]
pub enum TokenInfoError {
    /// The introspection endpoint returned a non-success status.
    #[error("token introspection failed with status {status}: {body}")]
    Failed {
        status: http::StatusCode,
        body: String,
    },
    /// The introspection endpoint returned a 200 response that cannot be
    /// used.
    #[error("malformed token introspection response: {0}")]
    Malformed(String),
}

/// Normalized metadata about an access token.
///
/// The metadata is immutable: it describes the token at the time of the
/// lookup, and the fields cannot be modified afterwards.
#[derive(Clone, Debug)]
pub struct TokenInfo {
    fields: HashMap<String, Value>,
    expires_at: Instant,
}

impl TokenInfo {
    /// Queries the introspection endpoint for metadata about `access_token`.
    ///
    /// The response must be a JSON document with at least an `exp` field
    /// holding the expiration as seconds since the Unix epoch. `exp` and
    /// `expires_in` are accepted as integers or as strings holding exactly
    /// the canonical decimal form of an integer; both are returned coerced
    /// to integers.
    ///
    /// # Example
    /// ```no_run
    /// # use gcp_iam_auth::token_info::TokenInfo;
    /// # tokio_test::block_on(async {
    /// let info = TokenInfo::lookup("ya29.some-access-token").await?;
    /// println!("token expires at {:?}", info.expires_at());
    /// # Ok::<(), anyhow::Error>(())
    /// # });
    /// ```
    pub async fn lookup(access_token: &str) -> Result<TokenInfo> {
        Self::lookup_from_endpoint(access_token, TOKEN_INFO_ENDPOINT).await
    }

    pub(crate) async fn lookup_from_endpoint(
        access_token: &str,
        endpoint: &str,
    ) -> Result<TokenInfo> {
        let client = reqwest::Client::new();
        let response = client
            .get(endpoint)
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(errors::from_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.map_err(errors::retryable)?;
            return Err(CredentialsError::from_source(
                errors::is_retryable(status),
                TokenInfoError::Failed { status, body },
            ));
        }

        let fields = response.json::<HashMap<String, Value>>().await.map_err(|e| {
            let retryable = !e.is_decode();
            CredentialsError::from_source(retryable, e)
        })?;

        Self::from_fields(fields)
    }

    fn from_fields(mut fields: HashMap<String, Value>) -> Result<TokenInfo> {
        let exp = match fields.get("exp") {
            None => return Err(malformed("missing token expiry")),
            Some(value) => coerce_int_field("exp", value).map_err(errors::non_retryable)?,
        };
        fields.insert("exp".to_string(), Value::from(exp));

        let expires_in = match fields.get("expires_in") {
            None => None,
            Some(value) => {
                Some(coerce_int_field("expires_in", value).map_err(errors::non_retryable)?)
            }
        };
        if let Some(expires_in) = expires_in {
            fields.insert("expires_in".to_string(), Value::from(expires_in));
        }

        let expires_at = instant_from_epoch_seconds(exp.max(0) as u64)
            .ok_or_else(|| malformed("cannot compute token expiry"))?;

        Ok(TokenInfo { fields, expires_at })
    }

    /// The instant at which the token expires.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// All fields of the introspection response, with `exp` and `expires_in`
    /// coerced to integers.
    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    /// A single field of the introspection response.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

fn malformed(message: &str) -> CredentialsError {
    CredentialsError::from_source(false, TokenInfoError::Malformed(message.to_string()))
}

// Numeric fields arrive as JSON numbers or as strings. Strings must round
// trip exactly: "0290" or "+290" are not canonical integers and likely
// indicate a mangled response.
fn coerce_int_field(name: &str, value: &Value) -> std::result::Result<i64, TokenInfoError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| TokenInfoError::Malformed(format!("field `{name}` is not an integer"))),
        Value::String(s) => {
            let parsed = s.parse::<i64>().map_err(|_| {
                TokenInfoError::Malformed(format!("field `{name}` is not an integer: {s:?}"))
            })?;
            if parsed.to_string() != *s {
                return Err(TokenInfoError::Malformed(format!(
                    "field `{name}` is not a canonical integer: {s:?}"
                )));
            }
            Ok(parsed)
        }
        _ => Err(TokenInfoError::Malformed(format!(
            "field `{name}` is not an integer"
        ))),
    }
}
