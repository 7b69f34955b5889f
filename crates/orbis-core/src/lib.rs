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

//! # Orbis Core
//!
//! Foundational crate containing the value types and contracts shared by every
//! layer of the Orbis service runtime: identifiers, the error taxonomy, typed
//! service properties, semantic versions and the LDAP filter language used to
//! query the service registry.

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod event;
pub mod filter;
pub mod ids;
pub mod properties;
pub mod version;

pub use error::{FrameworkError, Result, Status};
pub use event::{EventBus, ServiceEvent, ServiceEventKind};
pub use filter::Filter;
pub use ids::{BundleId, ServiceId, TrackerId};
pub use properties::{Properties, PropertyValue};
pub use version::{Version, VersionRange};
