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

//! Serializable snapshots of the dependency manager, for diagnostics.

use crate::dependency::DependencyStrategy;
use crate::machine::DependencyId;
use crate::state::ComponentState;
use orbis_core::{BundleId, ServiceId};
use serde::Serialize;

/// A provided interface of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    /// Service name the interface is registered under.
    pub name: String,
    /// Declared version.
    pub version: Option<String>,
    /// Id of the registration while the component is active.
    pub service_id: Option<ServiceId>,
}

/// A service dependency of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyInfo {
    /// Id of the dependency within its component.
    pub id: DependencyId,
    /// Required service name.
    pub service_name: String,
    /// Accepted versions.
    pub version_range: Option<String>,
    /// Extra LDAP filter.
    pub filter: Option<String>,
    /// Whether the component needs at least one service to start.
    pub required: bool,
    /// Change strategy.
    pub strategy: DependencyStrategy,
    /// Matching services currently registered.
    pub available: usize,
    /// Services currently handed to the component.
    pub bound: usize,
}

/// State of one component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInfo {
    /// Component uuid, also published as `component.uuid` on its services.
    pub uuid: String,
    /// Component name.
    pub name: String,
    /// Lifecycle state.
    pub state: ComponentState,
    /// `true` in the terminal active state.
    pub active: bool,
    /// Number of suspend rebuilds so far.
    pub generation: u64,
    /// Last `init`/`start`/`stop`/`deinit` failure.
    pub last_error: Option<String>,
    /// Provided interfaces.
    pub interfaces: Vec<InterfaceInfo>,
    /// Service dependencies.
    pub dependencies: Vec<DependencyInfo>,
}

impl ComponentInfo {
    /// Required dependencies that have no service, by service name.
    pub fn missing_required(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|dependency| dependency.required && dependency.available == 0)
            .map(|dependency| dependency.service_name.as_str())
            .collect()
    }
}

/// State of a dependency manager and its components.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyManagerInfo {
    /// Bundle owning the manager.
    pub bundle_id: BundleId,
    /// The managed components, in insertion order.
    pub components: Vec<ComponentInfo>,
}

impl DependencyManagerInfo {
    /// Pretty-printed JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}
