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
use crate::errors;
use crate::token::Token;
use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};

/// The header used to attribute quota and billing.
pub(crate) const QUOTA_PROJECT_KEY: &str = "x-goog-user-project";

/// The name of the telemetry header.
pub(crate) const X_GOOG_API_CLIENT: &str = "x-goog-api-client";

/// Access token request type.
pub(crate) const ACCESS_TOKEN_REQUEST_TYPE: &str = "at";

/// ID token request type.
pub(crate) const ID_TOKEN_REQUEST_TYPE: &str = "it";

/// Sign JWT request type.
pub(crate) const SIGN_JWT_REQUEST_TYPE: &str = "jwt";

/// Format the value of the `x-goog-api-client` header.
pub(crate) fn metrics_header_value(request_type: &str, cred_type: &str) -> String {
    let auth_version = env!("CARGO_PKG_VERSION");
    format!("auth/{auth_version} auth-request-type/{request_type} cred-type/{cred_type}")
}

/// A utility function to create bearer headers.
pub(crate) fn build_bearer_headers(
    token: &Token,
    quota_project_id: &Option<String>,
) -> Result<HeaderMap> {
    let mut value = HeaderValue::from_str(&format!("{} {}", token.token_type, token.token))
        .map_err(errors::non_retryable)?;
    value.set_sensitive(true);

    let mut header_map = HeaderMap::new();
    header_map.insert(AUTHORIZATION, value);

    if let Some(project) = quota_project_id {
        header_map.insert(
            HeaderName::from_static(QUOTA_PROJECT_KEY),
            HeaderValue::from_str(project).map_err(errors::non_retryable)?,
        );
    }

    Ok(header_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn test_token(token: &str, token_type: &str) -> Token {
        Token {
            token: token.to_string(),
            token_type: token_type.to_string(),
            expires_at: None,
        }
    }

    #[test]
    fn build_bearer_headers_basic_success() {
        let token = test_token("test_token", "Bearer");

        let headers = build_bearer_headers(&token, &None).unwrap();

        assert_eq!(headers.len(), 1, "{headers:?}");
        let value = headers
            .get(HeaderName::from_static("authorization"))
            .unwrap();

        assert_eq!(value, HeaderValue::from_static("Bearer test_token"));
        assert!(value.is_sensitive());
    }

    #[test]
    fn build_bearer_headers_with_quota_project_success() {
        let token = test_token("test_token", "Bearer");

        let quota_project_id = Some("test-project-123".to_string());
        let headers = build_bearer_headers(&token, &quota_project_id).unwrap();

        assert_eq!(headers.len(), 2, "{headers:?}");

        let token = headers
            .get(HeaderName::from_static("authorization"))
            .unwrap();
        assert_eq!(token, HeaderValue::from_static("Bearer test_token"));
        assert!(token.is_sensitive());

        let quota_project = headers
            .get(HeaderName::from_static(QUOTA_PROJECT_KEY))
            .unwrap();
        assert_eq!(quota_project, HeaderValue::from_static("test-project-123"));
    }

    #[test]
    fn build_bearer_headers_different_token_type() {
        let token = test_token("special_token", "MAC");

        let headers = build_bearer_headers(&token, &None).unwrap();

        assert_eq!(headers.len(), 1, "{headers:?}");

        let token = headers
            .get(HeaderName::from_static("authorization"))
            .unwrap();

        assert_eq!(token, HeaderValue::from_static("MAC special_token"));
        assert!(token.is_sensitive());
    }

    #[test]
    fn build_bearer_headers_invalid_token() {
        let token = test_token("token with \n invalid chars", "Bearer");

        let error = build_bearer_headers(&token, &None).unwrap_err();
        assert!(!error.is_transient(), "{error:?}");
        let source = error
            .source()
            .and_then(|e| e.downcast_ref::<http::header::InvalidHeaderValue>());
        assert!(source.is_some(), "{error:?}");
    }

    #[test]
    fn build_bearer_headers_invalid_quota_project() {
        let token = test_token("test_token", "Bearer");

        let quota_project_id = Some("bad\nproject".to_string());
        let error = build_bearer_headers(&token, &quota_project_id).unwrap_err();
        assert!(!error.is_transient(), "{error:?}");
    }

    #[test]
    fn metrics_header() {
        let header = metrics_header_value("at", "imp");
        let expected = format!(
            "auth/{} auth-request-type/at cred-type/imp",
            env!("CARGO_PKG_VERSION")
        );
        assert_eq!(header, expected);
    }
}
