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

//! Option builders for registering and using services.

use crate::registration::{ServiceFactory, ServiceInstance, ServiceReference, ServiceSource};
use crate::registry::ServiceQuery;
use crate::tracker::typed;
use orbis_core::constants::{SERVICE_RANKING, SERVICE_VERSION};
use orbis_core::{BundleId, Filter, Properties, PropertyValue, Result, ServiceId, Version, VersionRange};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type RegisteredCallback = Box<dyn FnOnce(ServiceId) + Send + 'static>;

/// Options for [`BundleContext::register_service_with_options`](crate::BundleContext::register_service_with_options).
pub struct RegistrationOptions {
    pub(crate) name: String,
    pub(crate) source: ServiceSource,
    pub(crate) properties: Properties,
    pub(crate) on_registered: Option<RegisteredCallback>,
}

impl RegistrationOptions {
    /// Registers `service` under `name`.
    pub fn new<S: ?Sized + Send + Sync + 'static>(service: Arc<S>, name: impl Into<String>) -> Self {
        Self::from_source(ServiceSource::Instance(ServiceInstance::new(service)), name)
    }

    /// Registers an already type-erased service object.
    pub fn from_instance(instance: ServiceInstance, name: impl Into<String>) -> Self {
        Self::from_source(ServiceSource::Instance(instance), name)
    }

    /// Registers a factory producing one instance per consuming bundle.
    pub fn factory(factory: Arc<dyn ServiceFactory>, name: impl Into<String>) -> Self {
        Self::from_source(ServiceSource::Factory(factory), name)
    }

    fn from_source(source: ServiceSource, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source,
            properties: Properties::new(),
            on_registered: None,
        }
    }

    /// Replaces the registration properties.
    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Adds one property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.set(key, value);
        self
    }

    /// Sets `service.ranking`.
    pub fn ranking(self, ranking: i64) -> Self {
        self.property(SERVICE_RANKING, ranking)
    }

    /// Sets `service.version`.
    pub fn version(self, version: Version) -> Self {
        self.property(SERVICE_VERSION, version)
    }

    /// Called on the event loop once the registration has been applied.
    /// Never called when the registration is cancelled.
    pub fn on_registered(mut self, callback: impl FnOnce(ServiceId) + Send + 'static) -> Self {
        self.on_registered = Some(Box::new(callback));
        self
    }
}

/// Type-erased use callback. Returns `true` when it actually ran.
pub(crate) type UseCallback<'a> = Box<dyn FnMut(&ServiceReference, &ServiceInstance) -> bool + 'a>;

fn use_callback<'a, S: ?Sized + Send + Sync + 'static>(
    mut callback: impl FnMut(Arc<S>, &Properties, BundleId) + 'a,
) -> UseCallback<'a> {
    Box::new(move |reference, instance| match typed::<S>(reference, instance) {
        Some(service) => {
            callback(service, reference.properties(), reference.bundle_id());
            true
        }
        None => false,
    })
}

/// Options for [`BundleContext::use_service_with_options`](crate::BundleContext::use_service_with_options)
/// and [`BundleContext::use_services_with_options`](crate::BundleContext::use_services_with_options).
pub struct UseServiceOptions<'a, S: ?Sized + Send + Sync + 'static> {
    pub(crate) query: ServiceQuery,
    pub(crate) wait_timeout: Option<Duration>,
    pub(crate) callback: Option<UseCallback<'a>>,
    _service: PhantomData<fn() -> Arc<S>>,
}

impl<'a, S: ?Sized + Send + Sync + 'static> UseServiceOptions<'a, S> {
    /// Uses services registered under `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            query: ServiceQuery::named(service_name),
            wait_timeout: None,
            callback: None,
            _service: PhantomData,
        }
    }

    /// Restricts to services whose version lies in `range`.
    pub fn version_range(mut self, range: VersionRange) -> Self {
        self.query = self.query.with_version_range(range);
        self
    }

    /// Adds an LDAP filter.
    pub fn filter(mut self, filter: &str) -> Result<Self> {
        self.query = self.query.with_filter_str(filter)?;
        Ok(self)
    }

    /// Adds an already parsed filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.query = self.query.with_filter(filter);
        self
    }

    /// Waits up to `timeout` for a matching service to appear.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// The callback receiving the service.
    pub fn callback(self, mut callback: impl FnMut(Arc<S>) + 'a) -> Self {
        self.callback_with_owner(move |service, _, _| callback(service))
    }

    /// The callback receiving the service and its properties.
    pub fn callback_with_properties(self, mut callback: impl FnMut(Arc<S>, &Properties) + 'a) -> Self {
        self.callback_with_owner(move |service, properties, _| callback(service, properties))
    }

    /// The callback receiving the service, its properties and its bundle.
    pub fn callback_with_owner(
        mut self,
        callback: impl FnMut(Arc<S>, &Properties, BundleId) + 'a,
    ) -> Self {
        self.callback = Some(use_callback::<S>(callback));
        self
    }
}

/// Options for [`BundleContext::use_tracked_service_with_options`](crate::BundleContext::use_tracked_service_with_options).
pub struct UseTrackedOptions<'a, S: ?Sized + Send + Sync + 'static> {
    pub(crate) filter: Option<Filter>,
    pub(crate) callback: Option<UseCallback<'a>>,
    _service: PhantomData<fn() -> Arc<S>>,
}

impl<'a, S: ?Sized + Send + Sync + 'static> UseTrackedOptions<'a, S> {
    /// Options without filter or callback.
    pub fn new() -> Self {
        Self {
            filter: None,
            callback: None,
            _service: PhantomData,
        }
    }

    /// Only uses tracked services matching `filter`.
    pub fn filter(mut self, filter: &str) -> Result<Self> {
        self.filter = Some(Filter::parse(filter)?);
        Ok(self)
    }

    /// The callback receiving the service.
    pub fn callback(self, mut callback: impl FnMut(Arc<S>) + 'a) -> Self {
        self.callback_with_owner(move |service, _, _| callback(service))
    }

    /// The callback receiving the service and its properties.
    pub fn callback_with_properties(self, mut callback: impl FnMut(Arc<S>, &Properties) + 'a) -> Self {
        self.callback_with_owner(move |service, properties, _| callback(service, properties))
    }

    /// The callback receiving the service, its properties and its bundle.
    pub fn callback_with_owner(
        mut self,
        callback: impl FnMut(Arc<S>, &Properties, BundleId) + 'a,
    ) -> Self {
        self.callback = Some(use_callback::<S>(callback));
        self
    }
}

impl<S: ?Sized + Send + Sync + 'static> Default for UseTrackedOptions<'_, S> {
    fn default() -> Self {
        Self::new()
    }
}
