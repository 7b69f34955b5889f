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

//! Framework events and the broadcast bus that carries them.

mod bus;

pub use bus::EventBus;

use crate::ids::{BundleId, ServiceId};
use crate::properties::Properties;
use serde::Serialize;

/// What happened to a service registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceEventKind {
    /// The service became visible in the registry.
    Registered,
    /// The service is being removed; trackers have already been told.
    Unregistering,
}

/// A change in the service registry, published after trackers were updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceEvent {
    /// The kind of change.
    pub kind: ServiceEventKind,
    /// Id of the registration.
    pub service_id: ServiceId,
    /// Service name (`objectClass`).
    pub service_name: String,
    /// Owning bundle.
    pub bundle_id: BundleId,
    /// Properties as seen by trackers, reserved keys included.
    pub properties: Properties,
}
