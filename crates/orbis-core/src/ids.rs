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

//! Strongly typed identifiers handed out by the framework.
//!
//! All identifiers wrap a signed 64-bit value. Ids are issued from monotonic
//! counters starting at 1 and are never reused within one framework instance;
//! negative values never name a live object.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! framework_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw id value.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw id value.
            pub const fn value(self) -> i64 {
                self.0
            }

            /// Returns `true` for values that can name a live object (`>= 0`).
            pub const fn is_valid(self) -> bool {
                self.0 >= 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

framework_id!(
    /// Identifier of a service registration.
    ServiceId
);

framework_id!(
    /// Identifier of a service tracker or meta tracker.
    TrackerId
);

framework_id!(
    /// Identifier of an installed bundle. Bundle `0` is the framework itself.
    BundleId
);

impl BundleId {
    /// The framework bundle, always present and always active.
    pub const FRAMEWORK: BundleId = BundleId(0);
}
