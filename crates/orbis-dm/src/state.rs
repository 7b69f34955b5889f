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

//! Lifecycle states of a managed component.

use serde::Serialize;
use std::fmt;

/// Where a component stands in its dependency-driven lifecycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    /// Not managed, or removed.
    #[default]
    Inactive,
    /// Managed, but at least one required dependency has no service.
    WaitingForRequired,
    /// `init` ran and required dependencies are bound; `start` has not
    /// succeeded yet, or a required dependency went away again.
    InstantiatedAndWaitingForRequired,
    /// Started, interfaces registered, optional dependencies bound.
    TrackingOptional,
}

impl ComponentState {
    /// `true` for the terminal active state.
    pub fn is_active(self) -> bool {
        self == ComponentState::TrackingOptional
    }

    /// `true` once `init` has run and `deinit` has not.
    pub fn is_instantiated(self) -> bool {
        self >= ComponentState::InstantiatedAndWaitingForRequired
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComponentState::Inactive => "INACTIVE",
            ComponentState::WaitingForRequired => "WAITING_FOR_REQUIRED",
            ComponentState::InstantiatedAndWaitingForRequired => {
                "INSTANTIATED_AND_WAITING_FOR_REQUIRED"
            }
            ComponentState::TrackingOptional => "TRACKING_OPTIONAL",
        })
    }
}
