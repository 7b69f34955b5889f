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

//! The dependency manager of one bundle.

use crate::component::{Component, ComponentHandle};
use crate::info::{ComponentInfo, DependencyManagerInfo};
use crate::machine::ManagedComponent;
use crate::state::ComponentState;
use orbis_core::{FrameworkError, Result};
use orbis_framework::BundleContext;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Components = Mutex<Vec<Arc<dyn ManagedComponent>>>;

/// Owns the components of a bundle and drives them on the framework event
/// loop. Cloning shares the same set of components.
///
/// Every component still managed when the bundle stops is removed.
#[derive(Clone)]
pub struct DependencyManager {
    context: BundleContext,
    components: Arc<Components>,
}

impl DependencyManager {
    /// Creates the manager of the bundle behind `context`.
    ///
    /// ## Arguments
    /// * `context` - Context of the bundle owning the components.
    /// ## Returns
    /// * A manager whose components are removed when the bundle stops.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` when the bundle is no longer installed.
    pub fn new(context: BundleContext) -> Result<Self> {
        let components: Arc<Components> = Arc::new(Mutex::new(Vec::new()));
        let weak: Weak<Components> = Arc::downgrade(&components);
        let bundle_id = context.bundle_id();
        context.register_stop_hook(move || {
            if let Some(components) = weak.upgrade() {
                log::debug!(
                    "Bundle {bundle_id} stopping: removing {} component(s)",
                    lock(&components).len()
                );
                // failures are logged per component
                let _ = remove_in_reverse(&components);
            }
        })?;
        Ok(Self {
            context,
            components,
        })
    }

    /// The bundle context the manager works for.
    pub fn context(&self) -> &BundleContext {
        &self.context
    }

    /// Adds a component and drives it as far as its dependencies allow.
    ///
    /// ## Arguments
    /// * `component` - The component to manage.
    /// ## Returns
    /// * A handle to inspect and edit the managed component.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for a malformed component, which is then not
    /// managed. When `init` or `start` fails the error is returned as
    /// `BundleException` but the component stays managed and is retried on
    /// the next dependency change. `IllegalState` once the framework is
    /// stopped.
    pub fn add<T: Send + Sync + 'static>(&self, component: Component<T>) -> Result<ComponentHandle<T>> {
        let core = component.build()?;
        let handle = ComponentHandle::new(Arc::clone(&core));
        let components = Arc::clone(&self.components);
        let context = self.context.clone();
        let name = format!("add component {}", handle.uuid());
        self.context.framework().execute_on_event_loop(&name, move || {
            lock(&components).push(core.clone());
            core.enable(&context)
        })??;
        Ok(handle)
    }

    /// Queues adding a component and returns its handle at once. Failures
    /// are logged.
    pub fn add_async<T: Send + Sync + 'static>(&self, component: Component<T>) -> Result<ComponentHandle<T>> {
        let core = component.build()?;
        let handle = ComponentHandle::new(Arc::clone(&core));
        let components = Arc::clone(&self.components);
        let context = self.context.clone();
        let name = format!("add component {}", handle.uuid());
        self.context.framework().submit_generic_event(&name, move || {
            lock(&components).push(core.clone());
            if let Err(e) = core.enable(&context) {
                log::error!("Adding component asynchronously: {e}");
            }
        })?;
        Ok(handle)
    }

    /// Removes a component: its trackers are stopped, then `stop` and
    /// `deinit` run and its interfaces are unregistered.
    ///
    /// ## Arguments
    /// * `uuid` - Uuid of the component, see [`ComponentHandle::uuid`].
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for an unknown uuid. `IllegalState` when called
    /// from a callback of the component itself; it then stays managed and
    /// untouched. A failing `stop` or `deinit` is returned as
    /// `BundleException` after the teardown completed.
    pub fn remove(&self, uuid: &str) -> Result<()> {
        let components = Arc::clone(&self.components);
        let uuid = uuid.to_string();
        let name = format!("remove component {uuid}");
        self.context
            .framework()
            .execute_on_event_loop(&name, move || take_and_remove(&components, &uuid))?
    }

    /// Queues removing a component.
    pub fn remove_async(&self, uuid: &str) -> Result<()> {
        if !lock(&self.components).iter().any(|c| c.uuid() == uuid) {
            return Err(unknown(uuid));
        }
        let components = Arc::clone(&self.components);
        let uuid = uuid.to_string();
        let name = format!("remove component {uuid}");
        self.context.framework().submit_generic_event(&name, move || {
            if let Err(e) = take_and_remove(&components, &uuid) {
                log::error!("Removing component asynchronously: {e}");
            }
        })?;
        Ok(())
    }

    /// Removes every component, most recently added first.
    ///
    /// # Errors
    ///
    /// The first failure, as for [`remove`](Self::remove). Every component
    /// is tried; the ones refusing removal stay managed.
    pub fn remove_all_components(&self) -> Result<()> {
        let components = Arc::clone(&self.components);
        self.context
            .framework()
            .execute_on_event_loop("remove all components", move || remove_in_reverse(&components))?
    }

    /// `true` when every component is active (vacuously for none).
    pub fn are_components_active(&self) -> bool {
        lock(&self.components)
            .iter()
            .all(|c| c.state().is_active())
    }

    /// `true` when at least one component is active.
    pub fn is_any_component_active(&self) -> bool {
        lock(&self.components)
            .iter()
            .any(|c| c.state().is_active())
    }

    /// Number of managed components.
    pub fn component_count(&self) -> usize {
        lock(&self.components).len()
    }

    /// Snapshots of every component, in insertion order.
    pub fn components(&self) -> Vec<ComponentInfo> {
        lock(&self.components).iter().map(|c| c.info()).collect()
    }

    /// Snapshot of one component.
    pub fn component(&self, uuid: &str) -> Option<ComponentInfo> {
        lock(&self.components)
            .iter()
            .find(|c| c.uuid() == uuid)
            .map(|c| c.info())
    }

    /// State of one component.
    pub fn component_state(&self, uuid: &str) -> Option<ComponentState> {
        lock(&self.components)
            .iter()
            .find(|c| c.uuid() == uuid)
            .map(|c| c.state())
    }

    /// Snapshot of the whole manager.
    pub fn info(&self) -> DependencyManagerInfo {
        DependencyManagerInfo {
            bundle_id: self.context.bundle_id(),
            components: self.components(),
        }
    }
}

fn lock(components: &Components) -> MutexGuard<'_, Vec<Arc<dyn ManagedComponent>>> {
    components.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unknown(uuid: &str) -> FrameworkError {
    FrameworkError::illegal_argument(format!("no component with uuid {uuid}"))
}

/// A component refusing removal (`IllegalState`, from its own callbacks)
/// was not torn down and stays managed.
fn refused(result: &Result<()>) -> bool {
    matches!(result, Err(FrameworkError::IllegalState(_)))
}

fn take_and_remove(components: &Components, uuid: &str) -> Result<()> {
    let (position, component) = {
        let mut components = lock(components);
        let position = components
            .iter()
            .position(|c| c.uuid() == uuid)
            .ok_or_else(|| unknown(uuid))?;
        (position, components.remove(position))
    };
    let result = component.disable();
    if refused(&result) {
        let mut components = lock(components);
        let position = position.min(components.len());
        components.insert(position, component);
    }
    result
}

/// Removes every component newest first. Each one is tried even when
/// another fails; the first failure is returned and refused components are
/// put back in their original order.
fn remove_in_reverse(components: &Components) -> Result<()> {
    let drained: Vec<_> = lock(components).drain(..).collect();
    let mut first_error = None;
    let mut kept = Vec::new();
    for component in drained.into_iter().rev() {
        let result = component.disable();
        if refused(&result) {
            kept.push(Arc::clone(&component));
        }
        if let Err(e) = result {
            log::error!("Removing component '{}': {e}", component.name());
            first_error.get_or_insert(e);
        }
    }
    kept.reverse();
    let mut components = lock(components);
    for (index, component) in kept.into_iter().enumerate() {
        components.insert(index, component);
    }
    first_error.map_or(Ok(()), Err)
}
