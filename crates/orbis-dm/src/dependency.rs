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

//! Service dependencies of a component.
//!
//! A [`ServiceDependency`] names the service a component needs, whether it is
//! required, and how the component reacts when the matching services change:
//!
//! - [`DependencyStrategy::Suspend`]: the component is torn down and rebuilt
//!   around the new set of services. Callbacks never race with the component's
//!   own code.
//! - [`DependencyStrategy::Locking`]: callbacks are delivered while the
//!   component keeps running; the implementation guards its own state.

use orbis_core::{Filter, FrameworkError, Properties, Result, VersionRange};
use orbis_framework::{ServiceTrackingOptions, TrackedService};
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// How a component reacts to changes of a dependency.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyStrategy {
    /// Tear the component down and rebuild it.
    #[default]
    Suspend,
    /// Deliver callbacks to the running component.
    Locking,
}

pub(crate) type SetFn<T> = Arc<dyn Fn(&T, Option<&TrackedService>) + Send + Sync>;
pub(crate) type ServiceFn<T> = Arc<dyn Fn(&T, &TrackedService) + Send + Sync>;
pub(crate) type SwapFn<T> =
    Arc<dyn Fn(&T, Option<&TrackedService>, Option<&TrackedService>) + Send + Sync>;

/// Downcasts a bound service for a typed callback; a service registered
/// under another type is skipped with a warning.
fn downcast_or_warn<S: ?Sized + Send + Sync + 'static>(service: &TrackedService) -> Option<Arc<S>> {
    let typed = service.downcast::<S>();
    if typed.is_none() {
        log::warn!(
            "Service {} ('{}') was registered as {}, not {}; dependency callback skipped",
            service.id(),
            service.reference().name(),
            service.instance().type_name(),
            std::any::type_name::<S>()
        );
    }
    typed
}

/// A typed dependency of a component implementation `T` on services `S`.
pub struct ServiceDependency<T, S: ?Sized> {
    service_name: Option<String>,
    version_range: Option<VersionRange>,
    filter: Option<Filter>,
    required: bool,
    strategy: DependencyStrategy,
    on_set: Vec<SetFn<T>>,
    on_swap: Vec<SwapFn<T>>,
    on_add: Vec<ServiceFn<T>>,
    on_remove: Vec<ServiceFn<T>>,
    _service: PhantomData<fn() -> Arc<S>>,
}

impl<T, S> ServiceDependency<T, S>
where
    T: Send + Sync + 'static,
    S: ?Sized + Send + Sync + 'static,
{
    /// An optional, suspend-strategy dependency without a service yet.
    pub fn new() -> Self {
        Self {
            service_name: None,
            version_range: None,
            filter: None,
            required: false,
            strategy: DependencyStrategy::default(),
            on_set: Vec::new(),
            on_swap: Vec::new(),
            on_add: Vec::new(),
            on_remove: Vec::new(),
            _service: PhantomData,
        }
    }

    /// Selects the service by name, optional version range and optional LDAP
    /// filter. Malformed input is rejected here, before the dependency is
    /// attached to anything.
    pub fn set_service(
        mut self,
        service_name: &str,
        version_range: Option<&str>,
        filter: Option<&str>,
    ) -> Result<Self> {
        if service_name.trim().is_empty() {
            return Err(FrameworkError::illegal_argument(
                "dependency service name must not be empty",
            ));
        }
        self.service_name = Some(service_name.to_string());
        self.version_range = version_range.map(VersionRange::parse).transpose()?;
        self.filter = filter.map(Filter::parse).transpose()?;
        Ok(self)
    }

    /// Marks the dependency as required.
    pub fn set_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Sets the change strategy.
    pub fn set_strategy(mut self, strategy: DependencyStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Called with the highest ranked service, or `None` when none is left.
    pub fn on_set(mut self, callback: impl Fn(&T, Option<Arc<S>>) + Send + Sync + 'static) -> Self {
        self.on_set.push(Arc::new(move |component: &T, service: Option<&TrackedService>| {
            match service {
                Some(service) => {
                    if let Some(typed) = downcast_or_warn::<S>(service) {
                        callback(component, Some(typed));
                    }
                }
                None => callback(component, None),
            }
        }));
        self
    }

    /// Like [`on_set`](Self::on_set), with the service properties.
    pub fn on_set_with_properties(
        mut self,
        callback: impl Fn(&T, Option<(Arc<S>, &Properties)>) + Send + Sync + 'static,
    ) -> Self {
        self.on_set.push(Arc::new(move |component: &T, service: Option<&TrackedService>| {
            match service {
                Some(service) => {
                    if let Some(typed) = downcast_or_warn::<S>(service) {
                        callback(component, Some((typed, service.properties())));
                    }
                }
                None => callback(component, None),
            }
        }));
        self
    }

    /// Called when the highest ranked service changes, with the previous and
    /// the new one. Fires right after the matching [`on_set`](Self::on_set).
    ///
    /// Mostly useful with [`DependencyStrategy::Locking`], where the running
    /// component swaps its service pointer under its own lock.
    pub fn on_swap(
        mut self,
        callback: impl Fn(&T, Option<Arc<S>>, Option<Arc<S>>) + Send + Sync + 'static,
    ) -> Self {
        self.on_swap.push(Arc::new(
            move |component: &T, previous: Option<&TrackedService>, current: Option<&TrackedService>| {
                let previous = match previous {
                    Some(service) => match downcast_or_warn::<S>(service) {
                        Some(typed) => Some(typed),
                        None => return,
                    },
                    None => None,
                };
                let current = match current {
                    Some(service) => match downcast_or_warn::<S>(service) {
                        Some(typed) => Some(typed),
                        None => return,
                    },
                    None => None,
                };
                callback(component, previous, current);
            },
        ));
        self
    }

    /// Called for every service bound to the component.
    pub fn on_add(mut self, callback: impl Fn(&T, Arc<S>) + Send + Sync + 'static) -> Self {
        self.on_add.push(Arc::new(move |component: &T, service: &TrackedService| {
            if let Some(typed) = downcast_or_warn::<S>(service) {
                callback(component, typed);
            }
        }));
        self
    }

    /// Like [`on_add`](Self::on_add), with the service properties.
    pub fn on_add_with_properties(
        mut self,
        callback: impl Fn(&T, Arc<S>, &Properties) + Send + Sync + 'static,
    ) -> Self {
        self.on_add.push(Arc::new(move |component: &T, service: &TrackedService| {
            if let Some(typed) = downcast_or_warn::<S>(service) {
                callback(component, typed, service.properties());
            }
        }));
        self
    }

    /// Called for every service unbound from the component.
    pub fn on_remove(mut self, callback: impl Fn(&T, Arc<S>) + Send + Sync + 'static) -> Self {
        self.on_remove.push(Arc::new(move |component: &T, service: &TrackedService| {
            if let Some(typed) = downcast_or_warn::<S>(service) {
                callback(component, typed);
            }
        }));
        self
    }

    /// Like [`on_remove`](Self::on_remove), with the service properties.
    pub fn on_remove_with_properties(
        mut self,
        callback: impl Fn(&T, Arc<S>, &Properties) + Send + Sync + 'static,
    ) -> Self {
        self.on_remove.push(Arc::new(move |component: &T, service: &TrackedService| {
            if let Some(typed) = downcast_or_warn::<S>(service) {
                callback(component, typed, service.properties());
            }
        }));
        self
    }

    pub(crate) fn erase(self) -> Result<Dependency<T>> {
        let service_name = self.service_name.ok_or_else(|| {
            FrameworkError::illegal_argument("service dependency has no service; call set_service first")
        })?;
        Ok(Dependency {
            service_name,
            version_range: self.version_range,
            filter: self.filter,
            required: self.required,
            strategy: self.strategy,
            on_set: self.on_set,
            on_swap: self.on_swap,
            on_add: self.on_add,
            on_remove: self.on_remove,
        })
    }
}

impl<T, S> Default for ServiceDependency<T, S>
where
    T: Send + Sync + 'static,
    S: ?Sized + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A dependency with its service type erased.
pub(crate) struct Dependency<T> {
    pub(crate) service_name: String,
    pub(crate) version_range: Option<VersionRange>,
    pub(crate) filter: Option<Filter>,
    pub(crate) required: bool,
    pub(crate) strategy: DependencyStrategy,
    on_set: Vec<SetFn<T>>,
    on_swap: Vec<SwapFn<T>>,
    on_add: Vec<ServiceFn<T>>,
    on_remove: Vec<ServiceFn<T>>,
}

impl<T> Dependency<T> {
    /// Tracker options for the dependency's services, without callbacks.
    pub(crate) fn tracking_options(&self) -> ServiceTrackingOptions<()> {
        let mut options = ServiceTrackingOptions::<()>::new(self.service_name.as_str());
        if let Some(range) = &self.version_range {
            options = options.version_range(range.clone());
        }
        if let Some(filter) = &self.filter {
            options = options.with_filter(filter.clone());
        }
        options
    }

    pub(crate) fn invoke_set(&self, component: &T, service: Option<&TrackedService>) {
        for callback in &self.on_set {
            callback(component, service);
        }
    }

    pub(crate) fn invoke_swap(
        &self,
        component: &T,
        previous: Option<&TrackedService>,
        current: Option<&TrackedService>,
    ) {
        for callback in &self.on_swap {
            callback(component, previous, current);
        }
    }

    pub(crate) fn invoke_add(&self, component: &T, service: &TrackedService) {
        for callback in &self.on_add {
            callback(component, service);
        }
    }

    pub(crate) fn invoke_remove(&self, component: &T, service: &TrackedService) {
        for callback in &self.on_remove {
            callback(component, service);
        }
    }

    pub(crate) fn filter_string(&self) -> Option<String> {
        self.filter.as_ref().map(ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbis_core::Status;

    struct Holder;

    #[test]
    fn test_defaults_are_optional_and_suspend() {
        let dep = ServiceDependency::<Holder, u32>::new()
            .set_service("numbers", None, None)
            .unwrap()
            .erase()
            .unwrap();
        assert!(!dep.required);
        assert_eq!(dep.strategy, DependencyStrategy::Suspend);
    }

    #[test]
    fn test_invalid_filter_fails_at_set_service() {
        let err = ServiceDependency::<Holder, u32>::new()
            .set_service("numbers", None, Some("(broken"))
            .err()
            .unwrap();
        assert_eq!(err.status(), Status::IllegalArgument);

        let err = ServiceDependency::<Holder, u32>::new()
            .set_service("numbers", Some("[2,1)"), None)
            .err()
            .unwrap();
        assert_eq!(err.status(), Status::IllegalArgument);

        let err = ServiceDependency::<Holder, u32>::new()
            .set_service(" ", None, None)
            .err()
            .unwrap();
        assert_eq!(err.status(), Status::IllegalArgument);
    }

    #[test]
    fn test_dependency_without_service_cannot_be_erased() {
        let err = ServiceDependency::<Holder, u32>::new().erase().err().unwrap();
        assert_eq!(err.status(), Status::IllegalArgument);
    }

    #[test]
    fn test_tracking_options_carry_the_query() {
        let dep = ServiceDependency::<Holder, u32>::new()
            .set_service("numbers", Some("[1,2)"), Some("(kind=odd)"))
            .unwrap()
            .set_required(true)
            .set_strategy(DependencyStrategy::Locking)
            .erase()
            .unwrap();
        assert!(dep.required);
        assert_eq!(dep.filter_string().as_deref(), Some("(kind=odd)"));
        assert_eq!(dep.strategy, DependencyStrategy::Locking);
    }
}
