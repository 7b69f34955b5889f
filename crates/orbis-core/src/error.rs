// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error taxonomy of the runtime.
//!
//! Every fallible API returns a [`Result`] whose error maps onto one of the
//! framework [`Status`] codes. Errors raised by bundle-supplied callbacks are
//! wrapped as [`FrameworkError::BundleException`] so that the runtime itself
//! never depends on the caller's error type.

use std::fmt;

/// Status code reported by framework operations and component bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Status {
    /// The operation completed.
    Success,
    /// A required parameter was missing or malformed.
    IllegalArgument,
    /// Resources could not be allocated.
    Enomem,
    /// The operation is invalid for the current state of the subsystem.
    IllegalState,
    /// A bundle-supplied callback signalled failure.
    BundleException,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "SUCCESS",
            Status::IllegalArgument => "ILLEGAL_ARGUMENT",
            Status::Enomem => "ENOMEM",
            Status::IllegalState => "ILLEGAL_STATE",
            Status::BundleException => "BUNDLE_EXCEPTION",
        };
        f.write_str(name)
    }
}

/// The error type of every fallible framework operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameworkError {
    /// A required parameter was missing or malformed (e.g. empty service name, bad filter).
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    /// Resources could not be allocated; all partial state has been unwound.
    #[error("out of resources: {0}")]
    Enomem(String),
    /// The operation is invalid for the subsystem's current state.
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// A bundle-supplied callback failed.
    #[error("bundle exception: {0}")]
    BundleException(String),
}

impl FrameworkError {
    /// Shorthand for [`FrameworkError::IllegalArgument`].
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        FrameworkError::IllegalArgument(msg.into())
    }

    /// Shorthand for [`FrameworkError::IllegalState`].
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        FrameworkError::IllegalState(msg.into())
    }

    /// Wraps a callback failure, keeping the whole context chain in the message.
    pub fn bundle_exception(context: impl fmt::Display, err: &anyhow::Error) -> Self {
        FrameworkError::BundleException(format!("{context}: {err:#}"))
    }

    /// Returns the status code this error maps onto.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            FrameworkError::IllegalArgument(_) => Status::IllegalArgument,
            FrameworkError::Enomem(_) => Status::Enomem,
            FrameworkError::IllegalState(_) => Status::IllegalState,
            FrameworkError::BundleException(_) => Status::BundleException,
        }
    }
}

/// Result alias used across the runtime.
pub type Result<T> = std::result::Result<T, FrameworkError>;

/// Converts an `Ok`/`Err` pair into a [`Status`].
pub fn status_of<T>(result: &Result<T>) -> Status {
    match result {
        Ok(_) => Status::Success,
        Err(e) => e.status(),
    }
}
