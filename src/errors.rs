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

use http::StatusCode;
use std::error::Error;
use std::fmt::{Display, Formatter, Result};
use std::sync::Arc;

/// Represents an error fetching or using a token.
///
/// Credentials may fail after they are successfully constructed. An example
/// is a temporary failure to mint a new token when the cached one expires.
/// Note that such errors may happen long after the credentials were created.
///
/// Applications rarely need to create instances of this error type. The
/// exception might be when testing application code, where the application is
/// mocking a credentials provider.
#[derive(Clone, Debug)]
pub struct CredentialsError {
    /// A boolean value indicating whether the error is transient.
    ///
    /// If `true`, the operation that resulted in this error might succeed
    /// upon retry. The crate performs no retries itself; callers that want
    /// retry loops should use this flag to classify failures.
    is_transient: bool,

    /// The underlying source of the error.
    ///
    /// This provides more specific information about the cause of the
    /// failure.
    source: CredentialsErrorImpl,
}

#[derive(Clone, Debug)]
enum CredentialsErrorImpl {
    SimpleMessage(String),
    Source(Arc<dyn Error + Send + Sync>),
}

impl CredentialsError {
    /// Creates a new `CredentialsError` from an underlying error.
    ///
    /// # Arguments
    /// * `is_transient` - whether the error may succeed on retry.
    /// * `source` - the underlying error that caused the auth failure.
    pub fn from_source<T: Error + Send + Sync + 'static>(is_transient: bool, source: T) -> Self {
        CredentialsError {
            is_transient,
            source: CredentialsErrorImpl::Source(Arc::new(source)),
        }
    }

    /// Creates a new `CredentialsError` from a message.
    ///
    /// # Arguments
    /// * `is_transient` - whether the error may succeed on retry.
    /// * `message` - a description of the auth failure.
    pub fn from_msg<T: Into<String>>(is_transient: bool, message: T) -> Self {
        CredentialsError {
            is_transient,
            source: CredentialsErrorImpl::SimpleMessage(message.into()),
        }
    }

    /// Returns `true` if the error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        self.is_transient
    }
}

impl std::error::Error for CredentialsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            CredentialsErrorImpl::SimpleMessage(_) => None,
            CredentialsErrorImpl::Source(source) => Some(source.as_ref()),
        }
    }
}

const TRANSIENT_MSG: &str = "but future attempts may succeed";
const PERMANENT_MSG: &str = "and future attempts will not succeed";

impl Display for CredentialsError {
    /// Formats the error message to include transience and source.
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let msg = if self.is_transient {
            TRANSIENT_MSG
        } else {
            PERMANENT_MSG
        };
        write!(f, "cannot create an auth token, {}, source: {}", msg, self.source)
    }
}

impl Display for CredentialsErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match &self {
            CredentialsErrorImpl::SimpleMessage(message) => write!(f, "{message}"),
            CredentialsErrorImpl::Source(source) => write!(f, "{source}"),
        }
    }
}

/// The credentials hold a token that was issued out-of-band and cannot be
/// re-acquired.
///
/// This error is the `source()` of the [CredentialsError] returned by
/// static token credentials whenever a new token is needed. It distinguishes
/// "expired and nothing can be done" from transient failures: callers should
/// obtain a new token from whatever system issued the original one.
#[derive(thiserror::Error, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[error("the token was issued out-of-band and cannot be refreshed")]
pub struct RefreshNotSupported;

/// A helper to create a transient error.
pub(crate) fn retryable<T: Error + Send + Sync + 'static>(source: T) -> CredentialsError {
    CredentialsError::from_source(true, source)
}

/// A helper to create a transient error from a message.
pub(crate) fn retryable_from_str<T: Into<String>>(message: T) -> CredentialsError {
    CredentialsError::from_msg(true, message)
}

/// A helper to create a permanent error.
pub(crate) fn non_retryable<T: Error + Send + Sync + 'static>(source: T) -> CredentialsError {
    CredentialsError::from_source(false, source)
}

/// A helper to create a permanent error from a message.
pub(crate) fn non_retryable_from_str<T: Into<String>>(message: T) -> CredentialsError {
    CredentialsError::from_msg(false, message)
}

/// Wraps errors produced while sending a request. The request never reached
/// the service, so a retry may succeed.
pub(crate) fn from_http_error(err: reqwest::Error) -> CredentialsError {
    retryable(err)
}

/// Converts a non-success HTTP response into an error, preserving the
/// response body.
pub(crate) async fn from_http_response(response: reqwest::Response) -> CredentialsError {
    let status = response.status();
    let transient = is_retryable(status);
    match response.text().await {
        Ok(body) => CredentialsError::from_msg(transient, body),
        Err(e) => CredentialsError::from_source(transient, e),
    }
}

pub(crate) fn is_retryable(c: StatusCode) -> bool {
    matches!(
        c,
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
    )
}
