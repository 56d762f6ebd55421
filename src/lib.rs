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

//! Credentials for services that authenticate through an IAM token issuance
//! backend.
//!
//! This crate produces bearer tokens on behalf of a service account and keeps
//! them fresh for the lifetime of the process. Three credential types are
//! provided:
//!
//! - [impersonated][credentials::impersonated]: exchange the caller's own
//!   credentials for an access token or an OIDC ID token minted for a target
//!   service account, optionally through a chain of delegates.
//! - [signed_jwt][credentials::signed_jwt]: build a JWT claim set locally and
//!   have the backend sign it on behalf of a service account, using the signed
//!   assertion as the bearer token.
//! - [static_token][credentials::static_token]: wrap a token issued
//!   out-of-band. These credentials know their expiration but can never be
//!   refreshed.
//!
//! All credential types are exposed through the
//! [Credentials][credentials::Credentials] handle. Its `headers()` method is
//! the integration point for HTTP clients: it returns the `Authorization`
//! header (and the quota project header, when configured), fetching a new
//! token first if the cached one is expired or about to expire.

/// Errors created during credentials construction.
pub mod build_errors;

/// Types and functions to work with credentials.
pub mod credentials;

/// Errors created while fetching or using tokens.
pub mod errors;

/// Types and functions to work with auth tokens.
pub mod token;

/// Remote token introspection.
pub mod token_info;

pub(crate) mod constants;
pub(crate) mod headers_util;
pub(crate) mod token_cache;

/// A `Result` alias where the `Err` case is
/// [errors::CredentialsError].
pub type Result<T> = std::result::Result<T, errors::CredentialsError>;

/// A `Result` alias where the `Err` case is [build_errors::Error].
pub type BuildResult<T> = std::result::Result<T, build_errors::Error>;
