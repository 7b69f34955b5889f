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

//! Components: an implementation object, its lifecycle callbacks, the
//! interfaces it provides and the services it depends on.

use crate::dependency::{Dependency, ServiceDependency};
use crate::info::ComponentInfo;
use crate::machine::{ComponentCore, DependencyId, Lifecycle, ManagedComponent, ProvidedInterface};
use crate::state::ComponentState;
use orbis_core::{FrameworkError, Properties, Result, Version};
use orbis_framework::ServiceInstance;
use std::sync::Arc;

/// A component under construction. Hand it to
/// [`DependencyManager::add`](crate::DependencyManager::add) to manage it.
pub struct Component<T> {
    uuid: String,
    name: String,
    implementation: Arc<T>,
    lifecycle: Lifecycle<T>,
    interfaces: Vec<ProvidedInterface>,
    dependencies: Vec<Dependency<T>>,
    error: Option<FrameworkError>,
}

impl<T: Send + Sync + 'static> Component<T> {
    /// Creates a component named `name` around `implementation`.
    pub fn new(name: impl Into<String>, implementation: T) -> Self {
        Self::with_shared(name, Arc::new(implementation))
    }

    /// Like [`new`](Self::new) for an implementation that is already shared.
    pub fn with_shared(name: impl Into<String>, implementation: Arc<T>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            implementation,
            lifecycle: Lifecycle::default(),
            interfaces: Vec::new(),
            dependencies: Vec::new(),
            error: None,
        }
    }

    /// The component uuid.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The implementation object.
    pub fn implementation(&self) -> &Arc<T> {
        &self.implementation
    }

    /// Called once every required dependency has a service.
    pub fn on_init(mut self, callback: impl Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.lifecycle.init = Some(Box::new(callback));
        self
    }

    /// Called after `init`, once required dependencies are bound.
    pub fn on_start(mut self, callback: impl Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.lifecycle.start = Some(Box::new(callback));
        self
    }

    /// Called when the component leaves the active state.
    pub fn on_stop(mut self, callback: impl Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.lifecycle.stop = Some(Box::new(callback));
        self
    }

    /// Undoes `init`.
    pub fn on_deinit(mut self, callback: impl Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.lifecycle.deinit = Some(Box::new(callback));
        self
    }

    /// Provides `service` under `name` while the component is active.
    pub fn add_interface<S: ?Sized + Send + Sync + 'static>(self, service: Arc<S>, name: &str) -> Self {
        self.add_interface_with_properties(service, name, None, Properties::new())
    }

    /// Provides `service` with a version and extra properties.
    pub fn add_interface_with_properties<S: ?Sized + Send + Sync + 'static>(
        mut self,
        service: Arc<S>,
        name: &str,
        version: Option<&str>,
        properties: Properties,
    ) -> Self {
        match provided_interface(ServiceInstance::new(service), name, version, properties) {
            Ok(interface) => self.interfaces.push(interface),
            Err(e) => self.record(e),
        }
        self
    }

    /// Declares a dependency.
    pub fn add_service_dependency<S: ?Sized + Send + Sync + 'static>(
        mut self,
        dependency: ServiceDependency<T, S>,
    ) -> Self {
        match dependency.erase() {
            Ok(dependency) => self.dependencies.push(dependency),
            Err(e) => self.record(e),
        }
        self
    }

    fn record(&mut self, error: FrameworkError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Validates the builder and turns it into a managed core.
    pub(crate) fn build(self) -> Result<Arc<ComponentCore<T>>> {
        if self.name.trim().is_empty() {
            return Err(FrameworkError::illegal_argument("component name must not be empty"));
        }
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(Arc::new(ComponentCore::new(
            self.uuid,
            self.name,
            self.implementation,
            self.lifecycle,
            self.interfaces,
            self.dependencies,
        )))
    }
}

fn provided_interface(
    instance: ServiceInstance,
    name: &str,
    version: Option<&str>,
    properties: Properties,
) -> Result<ProvidedInterface> {
    if name.trim().is_empty() {
        return Err(FrameworkError::illegal_argument("interface name must not be empty"));
    }
    Ok(ProvidedInterface {
        name: name.to_string(),
        instance,
        version: version.map(Version::parse).transpose()?,
        properties,
        registered: None,
    })
}

/// A managed component.
///
/// Structural changes go through the framework event loop, so they are
/// ordered with the dependency events of the component. Interfaces cannot
/// change while the component is active, dependencies not once it has been
/// instantiated.
pub struct ComponentHandle<T> {
    core: Arc<ComponentCore<T>>,
}

impl<T> Clone for ComponentHandle<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + Sync + 'static> ComponentHandle<T> {
    pub(crate) fn new(core: Arc<ComponentCore<T>>) -> Self {
        Self { core }
    }

    /// The component uuid.
    pub fn uuid(&self) -> &str {
        self.core.uuid()
    }

    /// The component name.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ComponentState {
        self.core.state()
    }

    /// `true` in the terminal active state.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// The implementation object.
    pub fn implementation(&self) -> &Arc<T> {
        self.core.implementation()
    }

    /// Diagnostic snapshot.
    pub fn info(&self) -> ComponentInfo {
        self.core.info()
    }

    /// Adds a provided interface. `IllegalState` while active.
    pub fn add_interface<S: ?Sized + Send + Sync + 'static>(&self, service: Arc<S>, name: &str) -> Result<()> {
        self.add_interface_with_properties(service, name, None, Properties::new())
    }

    /// Adds a provided interface with a version and extra properties.
    pub fn add_interface_with_properties<S: ?Sized + Send + Sync + 'static>(
        &self,
        service: Arc<S>,
        name: &str,
        version: Option<&str>,
        properties: Properties,
    ) -> Result<()> {
        let interface = provided_interface(ServiceInstance::new(service), name, version, properties)?;
        self.on_loop("add interface", move |core| core.add_interface(interface))
    }

    /// Removes the provided interfaces named `name`. Returns whether one
    /// existed. `IllegalState` while active.
    pub fn remove_interface(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.on_loop("remove interface", move |core| core.remove_interface(&name))
    }

    /// Adds a dependency. `IllegalState` once the component is instantiated.
    pub fn add_service_dependency<S: ?Sized + Send + Sync + 'static>(
        &self,
        dependency: ServiceDependency<T, S>,
    ) -> Result<DependencyId> {
        let dependency = dependency.erase()?;
        self.on_loop("add service dependency", move |core| core.add_dependency(dependency))
    }

    /// Removes a dependency. `IllegalState` once the component is instantiated.
    pub fn remove_service_dependency(&self, id: DependencyId) -> Result<()> {
        self.on_loop("remove service dependency", move |core| core.remove_dependency(id))
    }

    /// Runs `change` on the event loop when the component is managed, in
    /// place otherwise.
    fn on_loop<R: Send + 'static>(
        &self,
        what: &str,
        change: impl FnOnce(&Arc<ComponentCore<T>>) -> Result<R> + Send + 'static,
    ) -> Result<R> {
        match self.core.context() {
            Some(context) => {
                let core = Arc::clone(&self.core);
                let name = format!("{what} on component {}", self.core.uuid());
                context
                    .framework()
                    .execute_on_event_loop(&name, move || change(&core))?
            }
            None => change(&self.core),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbis_core::Status;

    struct Store;

    #[test]
    fn test_builder_errors_surface_at_build() {
        let err = Component::new("store", Store)
            .add_interface(Arc::new(1_u8), "")
            .build()
            .err()
            .unwrap();
        assert_eq!(err.status(), Status::IllegalArgument);

        let err = Component::new("store", Store)
            .add_service_dependency(ServiceDependency::<Store, u8>::new())
            .build()
            .err()
            .unwrap();
        assert_eq!(err.status(), Status::IllegalArgument);

        let err = Component::new("store", Store)
            .add_interface_with_properties(Arc::new(1_u8), "x", Some("not.a.version"), Properties::new())
            .build()
            .err()
            .unwrap();
        assert_eq!(err.status(), Status::IllegalArgument);
    }

    #[test]
    fn test_unmanaged_handle_edits_in_place() {
        let core = Component::new("store", Store).build().unwrap();
        let handle = ComponentHandle::new(core);
        assert_eq!(handle.state(), ComponentState::Inactive);
        handle.add_interface(Arc::new(1_u8), "bytes").unwrap();
        let id = handle
            .add_service_dependency(
                ServiceDependency::<Store, u8>::new()
                    .set_service("input", None, None)
                    .unwrap(),
            )
            .unwrap();
        let info = handle.info();
        assert_eq!(info.interfaces.len(), 1);
        assert_eq!(info.dependencies[0].id, id);
        assert!(handle.remove_interface("bytes").unwrap());
        handle.remove_service_dependency(id).unwrap();
        assert!(handle.info().dependencies.is_empty());
    }

    #[test]
    fn test_uuids_are_unique() {
        let a = Component::new("a", Store);
        let b = Component::new("b", Store);
        assert_ne!(a.uuid(), b.uuid());
        assert_eq!(uuid::Uuid::parse_str(a.uuid()).unwrap().get_version_num(), 4);
    }
}
