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

use std::time::Duration;

/// Default endpoint for the token issuance calls.
pub(crate) const IAM_CREDENTIALS_ENDPOINT: &str = "https://iamcredentials.googleapis.com";

/// Default endpoint for token introspection.
pub(crate) const TOKEN_INFO_ENDPOINT: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Requested lifetime for minted tokens unless overridden.
pub(crate) const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// Tokens within this margin of their expiration are treated as expired.
pub(crate) const TOKEN_REFRESH_SLACK: Duration = Duration::from_secs(60);
