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

//! In-process bundles.
//!
//! A bundle here is a named [`BundleActivator`] installed into a framework. The
//! activator is the seam through which bundle glue registers services, opens
//! trackers and creates dependency managers.

use crate::context::BundleContext;
use orbis_core::BundleId;
use serde::Serialize;
use std::fmt;

/// Lifecycle of an installed bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BundleState {
    /// Installed, never started.
    Installed,
    /// Installed and stopped, or failed to start.
    Resolved,
    /// The activator's `start` is running.
    Starting,
    /// Started.
    Active,
    /// The activator's `stop` is running.
    Stopping,
    /// Removed from the framework.
    Uninstalled,
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BundleState::Installed => "INSTALLED",
            BundleState::Resolved => "RESOLVED",
            BundleState::Starting => "STARTING",
            BundleState::Active => "ACTIVE",
            BundleState::Stopping => "STOPPING",
            BundleState::Uninstalled => "UNINSTALLED",
        };
        f.write_str(name)
    }
}

/// Start/stop entry points of a bundle.
///
/// Both run on the framework event loop. Services and trackers the bundle
/// leaves behind after `stop` are cleaned up by the framework.
pub trait BundleActivator: Send {
    /// Called when the bundle starts. An error leaves the bundle `Resolved`.
    fn start(&mut self, context: &BundleContext) -> anyhow::Result<()>;

    /// Called when the bundle stops.
    fn stop(&mut self, _context: &BundleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) type StopHook = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct BundleEntry {
    pub(crate) id: BundleId,
    pub(crate) symbolic_name: String,
    pub(crate) state: BundleState,
    pub(crate) activator: Option<Box<dyn BundleActivator>>,
    pub(crate) stop_hooks: Vec<StopHook>,
}

impl BundleEntry {
    pub(crate) fn new(
        id: BundleId,
        symbolic_name: String,
        activator: Option<Box<dyn BundleActivator>>,
    ) -> Self {
        Self {
            id,
            symbolic_name,
            state: BundleState::Installed,
            activator,
            stop_hooks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(BundleState::Active.to_string(), "ACTIVE");
        assert_eq!(BundleState::Resolved.to_string(), "RESOLVED");
    }

    #[test]
    fn test_new_entry_is_installed() {
        let entry = BundleEntry::new(BundleId::new(3), "demo".into(), None);
        assert_eq!(entry.state, BundleState::Installed);
        assert_eq!(entry.id.value(), 3);
        assert!(entry.stop_hooks.is_empty());
    }
}
