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

//! Errors created during credentials construction.

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for [Credentials] builders.
///
/// These errors are raised before any network call is made: they always
/// indicate an illegal combination of construction options, never a failure
/// of the backend. Retrying a build with the same options cannot succeed.
///
/// [Credentials]: crate::credentials::Credentials
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// A required field was missing from the builder.
    pub fn is_missing_field(&self) -> bool {
        matches!(self.0, ErrorKind::MissingField(_))
    }

    /// The combination of builder options is not legal.
    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidConfiguration(_))
    }

    /// A required field was missing from the builder.
    pub(crate) fn missing_field(field: &'static str) -> Error {
        Error(ErrorKind::MissingField(field))
    }

    /// The combination of builder options is not legal.
    pub(crate) fn invalid_configuration<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::InvalidConfiguration(source.into()))
    }
}

#[derive(thiserror::Error, Debug)]
enum ErrorKind {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid credentials configuration: {0}")]
    InvalidConfiguration(#[source] BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn constructors() {
        let error = Error::missing_field("test-field");
        assert!(error.is_missing_field(), "{error:?}");
        assert!(!error.is_invalid_configuration(), "{error:?}");
        assert!(error.source().is_none(), "{error:?}");
        assert!(error.to_string().contains("test-field"), "{error}");

        let error = Error::invalid_configuration("test message");
        assert!(error.is_invalid_configuration(), "{error:?}");
        assert!(!error.is_missing_field(), "{error:?}");
        assert!(error.source().is_some(), "{error:?}");
        assert!(error.to_string().contains("test message"), "{error}");
    }
}
