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

//! The per-bundle API of the framework.
//!
//! Mutating calls come in two flavours. The synchronous ones run their work on
//! the event loop and wait for it (inline when already on the loop thread). The
//! `_async` ones queue the work and return at once; the matching `wait_for_*`
//! call blocks until it has been applied. A queued registration or tracker can
//! still be cancelled by unregistering or stopping it, in which case it never
//! becomes visible.

use crate::event_loop::Completion;
use crate::framework::Framework;
use crate::options::{RegistrationOptions, UseCallback, UseServiceOptions, UseTrackedOptions};
use crate::registration::{ServiceFactory, ServiceInstance, ServiceReference, ServiceSource};
use crate::registry::{PendingKind, ServiceQuery, ServiceRegistry};
use crate::tracker::{MetaTrackerOptions, ServiceTrackingOptions, TrackerCore};
use orbis_core::{
    BundleId, Filter, FrameworkError, Properties, PropertyValue, Result, ServiceEvent, ServiceId,
    TrackerId,
};
use std::sync::Arc;
use std::time::Instant;

/// The handle through which a bundle talks to the framework.
#[derive(Clone, Debug)]
pub struct BundleContext {
    framework: Framework,
    bundle_id: BundleId,
}

impl BundleContext {
    pub(crate) fn new(framework: Framework, bundle_id: BundleId) -> Self {
        Self {
            framework,
            bundle_id,
        }
    }

    /// Id of the bundle this context belongs to.
    pub fn bundle_id(&self) -> BundleId {
        self.bundle_id
    }

    /// The framework.
    pub fn framework(&self) -> &Framework {
        &self.framework
    }

    /// A framework property.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.framework.property(key)
    }

    fn registry(&self) -> Arc<ServiceRegistry> {
        self.framework.registry_arc()
    }

    // ---- registration ----------------------------------------------------

    /// Registers `service` under `name` and waits until it is visible.
    ///
    /// ## Arguments
    /// * `service` - The service instance, shared with every consumer.
    /// * `name` - The name consumers look the service up by.
    /// * `properties` - Extra properties. Reserved keys are overwritten.
    /// ## Returns
    /// * The id of the new service.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for an empty name, `IllegalState` once the
    /// framework is stopped.
    pub fn register_service<S: ?Sized + Send + Sync + 'static>(
        &self,
        service: Arc<S>,
        name: &str,
        properties: Option<Properties>,
    ) -> Result<ServiceId> {
        self.register(
            ServiceSource::Instance(ServiceInstance::new(service)),
            name,
            properties,
            None,
            false,
        )
    }

    /// Queues the registration of `service` and returns its id immediately.
    pub fn register_service_async<S: ?Sized + Send + Sync + 'static>(
        &self,
        service: Arc<S>,
        name: &str,
        properties: Option<Properties>,
    ) -> Result<ServiceId> {
        self.register(
            ServiceSource::Instance(ServiceInstance::new(service)),
            name,
            properties,
            None,
            true,
        )
    }

    /// Registers a service factory producing one instance per consuming bundle.
    pub fn register_service_factory(
        &self,
        factory: Arc<dyn ServiceFactory>,
        name: &str,
        properties: Option<Properties>,
    ) -> Result<ServiceId> {
        self.register(ServiceSource::Factory(factory), name, properties, None, false)
    }

    /// Asynchronous [`register_service_factory`](Self::register_service_factory).
    pub fn register_service_factory_async(
        &self,
        factory: Arc<dyn ServiceFactory>,
        name: &str,
        properties: Option<Properties>,
    ) -> Result<ServiceId> {
        self.register(ServiceSource::Factory(factory), name, properties, None, true)
    }

    /// Registers a service described by `options`.
    ///
    /// ## Arguments
    /// * `options` - Name, instance or factory, properties and an optional
    ///   callback run once the service is visible.
    /// ## Returns
    /// * The id of the new service.
    ///
    /// # Errors
    ///
    /// Same as [`register_service`](Self::register_service).
    pub fn register_service_with_options(&self, options: RegistrationOptions) -> Result<ServiceId> {
        let RegistrationOptions {
            name,
            source,
            properties,
            on_registered,
        } = options;
        self.register(source, &name, Some(properties), on_registered, false)
    }

    /// Asynchronous [`register_service_with_options`](Self::register_service_with_options).
    pub fn register_service_with_options_async(
        &self,
        options: RegistrationOptions,
    ) -> Result<ServiceId> {
        let RegistrationOptions {
            name,
            source,
            properties,
            on_registered,
        } = options;
        self.register(source, &name, Some(properties), on_registered, true)
    }

    fn register(
        &self,
        source: ServiceSource,
        name: &str,
        properties: Option<Properties>,
        on_registered: Option<crate::options::RegisteredCallback>,
        asynchronous: bool,
    ) -> Result<ServiceId> {
        let registry = self.registry();
        let id = registry.next_service_id();
        let registration =
            registry.create_registration(id, name, self.bundle_id, properties, source)?;
        let event_name = format!("register service {id} '{name}'");

        if !asynchronous {
            let applied = Arc::clone(&registry);
            self.framework
                .event_loop()
                .execute(&event_name, move || applied.apply_register(registration))?;
            if let Some(callback) = on_registered {
                callback(id);
            }
            return Ok(id);
        }

        let completion = Completion::new();
        registry.add_pending(PendingKind::Registration, id.value(), completion.clone());
        let applied = Arc::clone(&registry);
        let submitted = self.framework.event_loop().submit_with(event_name, completion, move || {
            applied.apply_register(registration);
            if let Some(callback) = on_registered {
                callback(id);
            }
            applied.remove_pending(PendingKind::Registration, id.value());
        });
        if let Err(e) = submitted {
            registry.remove_pending(PendingKind::Registration, id.value());
            return Err(e);
        }
        Ok(id)
    }

    /// Unregisters a service and waits until in-flight uses by other threads
    /// have finished.
    ///
    /// Negative ids are ignored. An unknown id is logged and otherwise ignored,
    /// so unregistering twice is harmless. Unregistering a registration that is
    /// still queued cancels it.
    ///
    /// # Errors
    ///
    /// `IllegalState` once the framework is stopped. A service still in use
    /// after the stop timeout is logged, not reported.
    pub fn unregister_service(&self, id: ServiceId) -> Result<()> {
        if !id.is_valid() || self.cancel_pending_registration(id) {
            return Ok(());
        }
        let registry = self.registry();
        let applied = Arc::clone(&registry);
        let removed = self
            .framework
            .event_loop()
            .execute(&format!("unregister service {id}"), move || applied.apply_unregister(id))?;
        match removed {
            Some(registration) => {
                let timeout = self.framework.config().stop_timeout();
                if !registration.wait_until_unused(timeout) {
                    log::warn!(
                        "Service {id} still in use {}ms after unregistering; giving up waiting",
                        timeout.as_millis()
                    );
                }
            }
            None => log::error!("Cannot unregister service {id}: no such service"),
        }
        Ok(())
    }

    /// Queues the unregistration of a service.
    pub fn unregister_service_async(&self, id: ServiceId) -> Result<()> {
        if !id.is_valid() || self.cancel_pending_registration(id) {
            return Ok(());
        }
        let registry = self.registry();
        let completion = Completion::new();
        registry.add_pending(PendingKind::Unregistration, id.value(), completion.clone());
        let applied = Arc::clone(&registry);
        let submitted = self.framework.event_loop().submit_with(
            format!("unregister service {id}"),
            completion,
            move || {
                if applied.apply_unregister(id).is_none() {
                    log::error!("Cannot unregister service {id}: no such service");
                }
                applied.remove_pending(PendingKind::Unregistration, id.value());
            },
        );
        if let Err(e) = submitted {
            registry.remove_pending(PendingKind::Unregistration, id.value());
            return Err(e);
        }
        Ok(())
    }

    /// Cancels a registration that has not been applied yet. Returns `true`
    /// when the cancellation won, in which case the service never existed.
    fn cancel_pending_registration(&self, id: ServiceId) -> bool {
        let registry = self.registry();
        let Some(pending) = registry.pending(PendingKind::Registration, id.value()) else {
            return false;
        };
        if pending.cancel() {
            registry.remove_pending(PendingKind::Registration, id.value());
            log::debug!("Cancelled the queued registration of service {id}");
            true
        } else {
            false
        }
    }

    /// Blocks until a queued registration has been applied or cancelled.
    pub fn wait_for_async_registration(&self, id: ServiceId) {
        self.wait_pending(PendingKind::Registration, id.value());
    }

    /// Blocks until a queued unregistration has been applied.
    pub fn wait_for_async_unregistration(&self, id: ServiceId) {
        self.wait_pending(PendingKind::Unregistration, id.value());
    }

    fn wait_pending(&self, kind: PendingKind, id: i64) {
        if self.framework.is_event_loop_thread() {
            log::warn!("Waiting for a queued {kind:?} {id} on the event loop thread would deadlock; not waiting");
            return;
        }
        self.registry().wait_pending(kind, id, None);
    }

    // ---- discovery -------------------------------------------------------

    /// Id of the best service registered under `name`.
    pub fn find_service(&self, name: &str) -> Option<ServiceId> {
        self.registry().find_best(&ServiceQuery::named(name))
    }

    /// Ids of every service registered under `name`, best first.
    pub fn find_services(&self, name: &str) -> Vec<ServiceId> {
        self.find_references(&ServiceQuery::named(name))
            .iter()
            .map(ServiceReference::id)
            .collect()
    }

    /// Id of the best service matching `query`.
    ///
    /// ## Arguments
    /// * `query` - Service name, version range and filter to match.
    /// ## Returns
    /// * The highest ranked match, `None` when nothing matches.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for an empty service name.
    pub fn find_service_with_options(&self, query: &ServiceQuery) -> Result<Option<ServiceId>> {
        query.validate()?;
        Ok(self.registry().find_best(query))
    }

    /// Ids of every service matching `query`, best first.
    pub fn find_services_with_options(&self, query: &ServiceQuery) -> Result<Vec<ServiceId>> {
        query.validate()?;
        Ok(self
            .find_references(query)
            .iter()
            .map(ServiceReference::id)
            .collect())
    }

    /// References to every service matching `query`, best first.
    pub fn find_references(&self, query: &ServiceQuery) -> Vec<ServiceReference> {
        self.registry().find(query)
    }

    /// Reference to a registered service.
    pub fn service_reference(&self, id: ServiceId) -> Option<ServiceReference> {
        self.registry().reference(id)
    }

    // ---- use -------------------------------------------------------------

    /// Calls `callback` with the best service registered under `name`.
    ///
    /// The service cannot be unregistered while the callback runs. Returns
    /// whether a service was found.
    pub fn use_service<S: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        callback: impl FnOnce(Arc<S>),
    ) -> bool {
        let mut callback = Some(callback);
        let options = UseServiceOptions::<S>::new(name).callback(|service| {
            if let Some(callback) = callback.take() {
                callback(service);
            }
        });
        self.use_service_with_options(options).unwrap_or(false)
    }

    /// Calls `callback` with every service registered under `name`, best
    /// first. Returns how many services were used.
    pub fn use_services<S: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        callback: impl FnMut(Arc<S>),
    ) -> usize {
        let options = UseServiceOptions::<S>::new(name).callback(callback);
        self.use_services_with_options(options).unwrap_or(0)
    }

    /// Calls `callback` with the service of the given id.
    pub fn use_service_with_id<S: ?Sized + Send + Sync + 'static>(
        &self,
        id: ServiceId,
        callback: impl FnOnce(Arc<S>),
    ) -> bool {
        if !id.is_valid() {
            return false;
        }
        let Some(reference) = self.registry().reference(id) else {
            log::debug!("use_service_with_id: no service {id}");
            return false;
        };
        let Some(_pin) = reference.registration.pin() else {
            return false;
        };
        let Some(lease) = reference.registration.lease(self.bundle_id) else {
            return false;
        };
        match crate::tracker::typed::<S>(&reference, lease.instance()) {
            Some(service) => {
                callback(service);
                true
            }
            None => false,
        }
    }

    /// Uses the best service matching `options`, waiting for one to appear if
    /// a timeout was set.
    ///
    /// ## Arguments
    /// * `options` - The query, the callbacks and an optional wait timeout.
    /// ## Returns
    /// * `true` when a service was found and handed to the callbacks.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for an empty service name or when `options` carry
    /// no callback. On the event loop thread a timeout is ignored.
    pub fn use_service_with_options<S: ?Sized + Send + Sync + 'static>(
        &self,
        options: UseServiceOptions<'_, S>,
    ) -> Result<bool> {
        Ok(self.use_matching(options, false)? > 0)
    }

    /// Uses every service matching `options`. Returns how many were used.
    pub fn use_services_with_options<S: ?Sized + Send + Sync + 'static>(
        &self,
        options: UseServiceOptions<'_, S>,
    ) -> Result<usize> {
        self.use_matching(options, true)
    }

    fn use_matching<S: ?Sized + Send + Sync + 'static>(
        &self,
        options: UseServiceOptions<'_, S>,
        all: bool,
    ) -> Result<usize> {
        let UseServiceOptions {
            query,
            wait_timeout,
            callback,
            ..
        } = options;
        query.validate()?;
        let mut callback = callback
            .ok_or_else(|| FrameworkError::illegal_argument("use options need a callback"))?;

        let mut deadline = wait_timeout.map(|timeout| Instant::now() + timeout);
        if deadline.is_some() && self.framework.is_event_loop_thread() {
            log::warn!(
                "Use of '{query}' with a wait timeout on the event loop thread; not waiting since no registration could happen meanwhile"
            );
            deadline = None;
        }

        let registry = self.registry();
        loop {
            let seen = registry.generation();
            let used = self.use_once(&registry, &query, all, &mut callback);
            if used > 0 {
                return Ok(used);
            }
            match deadline {
                Some(deadline) if registry.wait_for_change(seen, deadline) => continue,
                _ => return Ok(0),
            }
        }
    }

    fn use_once(
        &self,
        registry: &ServiceRegistry,
        query: &ServiceQuery,
        all: bool,
        callback: &mut UseCallback<'_>,
    ) -> usize {
        let mut used = 0;
        for reference in registry.find(query) {
            // unregistered after the lookup: skip it
            let Some(_pin) = reference.registration.pin() else {
                continue;
            };
            let Some(lease) = reference.registration.lease(self.bundle_id) else {
                continue;
            };
            if callback(&reference, lease.instance()) {
                used += 1;
                if !all {
                    break;
                }
            }
        }
        used
    }

    // ---- tracking --------------------------------------------------------

    /// Tracks the best service registered under `name`; `on_set` receives it,
    /// or `None` once no service is left.
    pub fn track_service<S: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        on_set: impl Fn(Option<Arc<S>>) + Send + Sync + 'static,
    ) -> Result<TrackerId> {
        self.track_services_with_options(ServiceTrackingOptions::<S>::new(name).on_set(on_set))
    }

    /// Tracks every service registered under `name`.
    pub fn track_services<S: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        on_add: impl Fn(Arc<S>) + Send + Sync + 'static,
        on_remove: impl Fn(Arc<S>) + Send + Sync + 'static,
    ) -> Result<TrackerId> {
        self.track_services_with_options(
            ServiceTrackingOptions::<S>::new(name)
                .on_add(on_add)
                .on_remove(on_remove),
        )
    }

    /// Opens a tracker and waits until it has ingested the existing services.
    ///
    /// ## Arguments
    /// * `options` - The query and the set/add/remove callbacks.
    /// ## Returns
    /// * The id to pass to [`stop_tracker`](Self::stop_tracker).
    ///
    /// # Errors
    ///
    /// `IllegalArgument` for an empty service name, `IllegalState` once the
    /// framework is stopped.
    pub fn track_services_with_options<S: ?Sized + Send + Sync + 'static>(
        &self,
        options: ServiceTrackingOptions<S>,
    ) -> Result<TrackerId> {
        let (query, callbacks) = options.into_parts()?;
        let registry = self.registry();
        let id = registry.next_tracker_id();
        let tracker = Arc::new(TrackerCore::new(id, self.bundle_id, query, callbacks));
        self.framework
            .event_loop()
            .execute(&format!("open tracker {id}"), move || registry.apply_open_tracker(tracker))?;
        Ok(id)
    }

    /// Queues the creation of a tracker and returns its id immediately.
    pub fn track_services_with_options_async<S: ?Sized + Send + Sync + 'static>(
        &self,
        options: ServiceTrackingOptions<S>,
    ) -> Result<TrackerId> {
        let (query, callbacks) = options.into_parts()?;
        let registry = self.registry();
        let id = registry.next_tracker_id();
        let tracker = Arc::new(TrackerCore::new(id, self.bundle_id, query, callbacks));
        let completion = Completion::new();
        registry.add_pending(PendingKind::TrackerStart, id.value(), completion.clone());
        let applied = Arc::clone(&registry);
        let submitted = self.framework.event_loop().submit_with(
            format!("open tracker {id}"),
            completion,
            move || {
                applied.apply_open_tracker(tracker);
                applied.remove_pending(PendingKind::TrackerStart, id.value());
            },
        );
        if let Err(e) = submitted {
            registry.remove_pending(PendingKind::TrackerStart, id.value());
            return Err(e);
        }
        Ok(id)
    }

    /// Opens a meta tracker observing service trackers.
    pub fn track_service_trackers(&self, options: MetaTrackerOptions) -> Result<TrackerId> {
        let registry = self.registry();
        let id = registry.next_tracker_id();
        let meta = Arc::new(options.build(id, self.bundle_id)?);
        self.framework.event_loop().execute(&format!("open meta tracker {id}"), move || {
            registry.apply_open_meta_tracker(meta)
        })?;
        Ok(id)
    }

    /// Asynchronous [`track_service_trackers`](Self::track_service_trackers).
    pub fn track_service_trackers_async(&self, options: MetaTrackerOptions) -> Result<TrackerId> {
        let registry = self.registry();
        let id = registry.next_tracker_id();
        let meta = Arc::new(options.build(id, self.bundle_id)?);
        let completion = Completion::new();
        registry.add_pending(PendingKind::TrackerStart, id.value(), completion.clone());
        let applied = Arc::clone(&registry);
        let submitted = self.framework.event_loop().submit_with(
            format!("open meta tracker {id}"),
            completion,
            move || {
                applied.apply_open_meta_tracker(meta);
                applied.remove_pending(PendingKind::TrackerStart, id.value());
            },
        );
        if let Err(e) = submitted {
            registry.remove_pending(PendingKind::TrackerStart, id.value());
            return Err(e);
        }
        Ok(id)
    }

    /// Stops a tracker. No callback of it fires after this returns.
    ///
    /// Stopping an unknown or already stopped tracker is logged and ignored.
    /// A tracker whose creation is still queued is cancelled.
    ///
    /// # Errors
    ///
    /// `IllegalState` once the framework is stopped.
    pub fn stop_tracker(&self, id: TrackerId) -> Result<()> {
        if !id.is_valid() || self.cancel_pending_tracker(id) {
            return Ok(());
        }
        let registry = self.registry();
        let found = self
            .framework
            .event_loop()
            .execute(&format!("stop tracker {id}"), move || close_any_tracker(&registry, id))?;
        if !found {
            log::error!("Cannot stop tracker {id}: no such tracker");
        }
        Ok(())
    }

    /// Queues stopping a tracker.
    pub fn stop_tracker_async(&self, id: TrackerId) -> Result<()> {
        if !id.is_valid() || self.cancel_pending_tracker(id) {
            return Ok(());
        }
        let registry = self.registry();
        let completion = Completion::new();
        registry.add_pending(PendingKind::TrackerStop, id.value(), completion.clone());
        let applied = Arc::clone(&registry);
        let submitted = self.framework.event_loop().submit_with(
            format!("stop tracker {id}"),
            completion,
            move || {
                if !close_any_tracker(&applied, id) {
                    log::error!("Cannot stop tracker {id}: no such tracker");
                }
                applied.remove_pending(PendingKind::TrackerStop, id.value());
            },
        );
        if let Err(e) = submitted {
            registry.remove_pending(PendingKind::TrackerStop, id.value());
            return Err(e);
        }
        Ok(())
    }

    fn cancel_pending_tracker(&self, id: TrackerId) -> bool {
        let registry = self.registry();
        let Some(pending) = registry.pending(PendingKind::TrackerStart, id.value()) else {
            return false;
        };
        if pending.cancel() {
            registry.remove_pending(PendingKind::TrackerStart, id.value());
            log::debug!("Cancelled the queued creation of tracker {id}");
            true
        } else {
            false
        }
    }

    /// Blocks until a queued tracker creation has been applied or cancelled.
    pub fn wait_for_async_tracker(&self, id: TrackerId) {
        self.wait_pending(PendingKind::TrackerStart, id.value());
    }

    /// Blocks until a queued tracker stop has been applied.
    pub fn wait_for_async_stop_tracker(&self, id: TrackerId) {
        self.wait_pending(PendingKind::TrackerStop, id.value());
    }

    /// Calls `callback` with the highest ranked service of a tracker.
    ///
    /// Does not go through the event loop, so it is safe from tracker
    /// callbacks. Returns `false` for an unknown tracker or an empty one.
    pub fn use_tracked_service<S: ?Sized + Send + Sync + 'static>(
        &self,
        tracker_id: TrackerId,
        callback: impl FnOnce(Arc<S>),
    ) -> bool {
        let mut callback = Some(callback);
        let options = UseTrackedOptions::<S>::new().callback(|service| {
            if let Some(callback) = callback.take() {
                callback(service);
            }
        });
        self.use_tracked_service_with_options(tracker_id, options)
    }

    /// Calls `callback` with every service of a tracker, highest rank first.
    pub fn use_tracked_services<S: ?Sized + Send + Sync + 'static>(
        &self,
        tracker_id: TrackerId,
        callback: impl FnMut(Arc<S>),
    ) -> usize {
        self.use_tracked_services_with_options(tracker_id, UseTrackedOptions::<S>::new().callback(callback))
    }

    /// Uses the highest ranked tracked service matching `options`.
    pub fn use_tracked_service_with_options<S: ?Sized + Send + Sync + 'static>(
        &self,
        tracker_id: TrackerId,
        options: UseTrackedOptions<'_, S>,
    ) -> bool {
        self.use_tracked(tracker_id, options, false) > 0
    }

    /// Uses every tracked service matching `options`.
    pub fn use_tracked_services_with_options<S: ?Sized + Send + Sync + 'static>(
        &self,
        tracker_id: TrackerId,
        options: UseTrackedOptions<'_, S>,
    ) -> usize {
        self.use_tracked(tracker_id, options, true)
    }

    fn use_tracked<S: ?Sized + Send + Sync + 'static>(
        &self,
        tracker_id: TrackerId,
        options: UseTrackedOptions<'_, S>,
        all: bool,
    ) -> usize {
        let UseTrackedOptions {
            filter, callback, ..
        } = options;
        let Some(mut callback) = callback else {
            log::warn!("use_tracked_service on tracker {tracker_id} without a callback");
            return 0;
        };
        let Some(tracker) = self.registry().tracker(tracker_id) else {
            log::warn!("Cannot use tracker {tracker_id}: no such tracker");
            return 0;
        };
        let mut used = 0;
        // snapshot so no tracker lock is held while user code runs
        for service in tracker.snapshot() {
            if !filter
                .as_ref()
                .map_or(true, |f: &Filter| f.matches(service.properties()))
            {
                continue;
            }
            let Some(_pin) = service.reference().registration.pin() else {
                continue;
            };
            if callback(service.reference(), service.instance()) {
                used += 1;
                if !all {
                    break;
                }
            }
        }
        used
    }

    // ---- events and hooks ------------------------------------------------

    /// Subscribes to service registration events.
    pub fn subscribe_service_events(&self) -> flume::Receiver<ServiceEvent> {
        self.framework.registry().subscribe()
    }

    /// Blocks until every queued framework event has been processed.
    pub fn wait_for_events(&self) {
        self.framework.wait_for_empty_event_queue();
    }

    /// Runs `hook` on the event loop when this bundle stops, after its
    /// activator's `stop` and before leftovers are cleaned up.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` when the bundle is no longer installed.
    pub fn register_stop_hook(&self, hook: impl FnOnce() + Send + 'static) -> Result<()> {
        self.framework.add_stop_hook(self.bundle_id, Box::new(hook))
    }

    /// Returns `true` on the framework event loop thread.
    pub fn is_event_loop_thread(&self) -> bool {
        self.framework.is_event_loop_thread()
    }
}

fn close_any_tracker(registry: &ServiceRegistry, id: TrackerId) -> bool {
    if registry.is_meta_tracker(id) {
        registry.apply_close_meta_tracker(id)
    } else {
        registry.apply_close_tracker(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::ServiceFactory;
    use orbis_core::constants::{SERVICE_RANKING, SERVICE_VERSION};
    use orbis_core::{Status, Version, VersionRange};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    fn framework() -> (Framework, BundleContext) {
        let framework = Framework::with_defaults().unwrap();
        let context = framework.context();
        (framework, context)
    }

    #[test]
    fn test_register_find_and_use_trait_object() {
        let (framework, ctx) = framework();
        let service: Arc<dyn Greeter> = Arc::new(English);
        let id = ctx.register_service(service, "greeter", None).unwrap();
        assert_eq!(ctx.find_service("greeter"), Some(id));

        let mut greeting = String::new();
        assert!(ctx.use_service::<dyn Greeter>("greeter", |g| greeting = g.greet()));
        assert_eq!(greeting, "hello");

        ctx.unregister_service(id).unwrap();
        assert_eq!(ctx.find_service("greeter"), None);
        assert!(!ctx.use_service::<dyn Greeter>("greeter", |_| {}));
        framework.stop().unwrap();
    }

    #[test]
    fn test_use_with_wrong_type_is_not_counted() {
        let (framework, ctx) = framework();
        ctx.register_service(Arc::new(5_u32), "number", None).unwrap();
        assert!(!ctx.use_service::<String>("number", |_| {}));
        assert!(ctx.use_service::<u32>("number", |n| assert_eq!(*n, 5)));
        framework.stop().unwrap();
    }

    #[test]
    fn test_unregister_is_idempotent_and_ignores_negative_ids() {
        let (framework, ctx) = framework();
        let id = ctx.register_service(Arc::new(1_u8), "x", None).unwrap();
        ctx.unregister_service(id).unwrap();
        ctx.unregister_service(id).unwrap();
        ctx.unregister_service(ServiceId::new(-1)).unwrap();
        ctx.unregister_service_async(ServiceId::new(-5)).unwrap();
        framework.stop().unwrap();
    }

    #[test]
    fn test_empty_name_is_illegal_argument() {
        let (framework, ctx) = framework();
        let err = ctx.register_service(Arc::new(1_u8), "", None).unwrap_err();
        assert_eq!(err.status(), Status::IllegalArgument);
        let err = ctx
            .track_services_with_options(ServiceTrackingOptions::<u8>::new(""))
            .unwrap_err();
        assert_eq!(err.status(), Status::IllegalArgument);
        framework.stop().unwrap();
    }

    #[test]
    fn test_find_with_version_range() {
        let (framework, ctx) = framework();
        let old = ctx
            .register_service_with_options(
                RegistrationOptions::new(Arc::new(1_u8), "calc").version(Version::new(1, 5, 0)),
            )
            .unwrap();
        ctx.register_service_with_options(
            RegistrationOptions::new(Arc::new(2_u8), "calc")
                .version(Version::new(2, 1, 0))
                .ranking(5),
        )
        .unwrap();

        let query = ServiceQuery::named("calc").with_version_range(VersionRange::parse("[1,2)").unwrap());
        assert_eq!(ctx.find_service_with_options(&query).unwrap(), Some(old));
        assert_eq!(ctx.find_services("calc").len(), 2);

        let bad = ServiceQuery::named("");
        assert!(ctx.find_service_with_options(&bad).is_err());
        framework.stop().unwrap();
    }

    #[test]
    fn test_use_services_visits_best_first() {
        let (framework, ctx) = framework();
        for (value, ranking) in [(1_u32, 0_i64), (2, 10), (3, 5)] {
            let props = Properties::new().with(SERVICE_RANKING, ranking);
            ctx.register_service(Arc::new(value), "n", Some(props)).unwrap();
        }
        let mut seen = Vec::new();
        assert_eq!(ctx.use_services::<u32>("n", |n| seen.push(*n)), 3);
        assert_eq!(seen, vec![2, 3, 1]);
        framework.stop().unwrap();
    }

    #[test]
    fn test_use_with_properties_sees_reserved_keys() {
        let (framework, ctx) = framework();
        let id = ctx
            .register_service_with_options(
                RegistrationOptions::new(Arc::new(1_u8), "v").property(SERVICE_VERSION, "3.1"),
            )
            .unwrap();
        let mut version = None;
        let used = ctx
            .use_service_with_options(UseServiceOptions::<u8>::new("v").callback_with_properties(
                |_, props| {
                    version = props.get(SERVICE_VERSION).cloned();
                    assert_eq!(props.get_as_long(orbis_core::constants::SERVICE_ID, -1), id.value());
                },
            ))
            .unwrap();
        assert!(used);
        assert_eq!(version, Some(PropertyValue::Version(Version::new(3, 1, 0))));
        framework.stop().unwrap();
    }

    #[test]
    fn test_use_waits_for_late_registration() {
        let (framework, ctx) = framework();
        let late = ctx.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            late.register_service(Arc::new(9_u16), "late", None).unwrap();
        });
        let mut value = 0;
        let used = ctx
            .use_service_with_options(
                UseServiceOptions::<u16>::new("late")
                    .wait_timeout(Duration::from_secs(5))
                    .callback(|v| value = *v),
            )
            .unwrap();
        handle.join().unwrap();
        assert!(used);
        assert_eq!(value, 9);
        framework.stop().unwrap();
    }

    #[test]
    fn test_use_times_out_without_service() {
        let (framework, ctx) = framework();
        let used = ctx
            .use_service_with_options(
                UseServiceOptions::<u16>::new("never")
                    .wait_timeout(Duration::from_millis(20))
                    .callback(|_| {}),
            )
            .unwrap();
        assert!(!used);
        framework.stop().unwrap();
    }

    #[test]
    fn test_async_registration_then_wait() {
        let (framework, ctx) = framework();
        let registered = Arc::new(AtomicUsize::new(0));
        let id = ctx
            .register_service_with_options_async(
                RegistrationOptions::new(Arc::new(1_u8), "async").on_registered({
                    let registered = registered.clone();
                    move |_| {
                        registered.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();
        ctx.wait_for_async_registration(id);
        assert_eq!(registered.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.find_service("async"), Some(id));

        ctx.unregister_service_async(id).unwrap();
        ctx.wait_for_async_unregistration(id);
        assert_eq!(ctx.find_service("async"), None);
        framework.stop().unwrap();
    }

    #[test]
    fn test_track_service_follows_best_ranked() {
        let (framework, ctx) = framework();
        let current = Arc::new(Mutex::new(None::<u32>));
        let tracker = ctx
            .track_service::<u32>("ranked", {
                let current = current.clone();
                move |service| *current.lock().unwrap() = service.map(|s| *s)
            })
            .unwrap();
        let low = ctx
            .register_service(Arc::new(1_u32), "ranked", Some(Properties::new().with(SERVICE_RANKING, 1_i64)))
            .unwrap();
        let high = ctx
            .register_service(Arc::new(2_u32), "ranked", Some(Properties::new().with(SERVICE_RANKING, 2_i64)))
            .unwrap();
        assert_eq!(*current.lock().unwrap(), Some(2));
        ctx.unregister_service(high).unwrap();
        assert_eq!(*current.lock().unwrap(), Some(1));
        ctx.unregister_service(low).unwrap();
        assert_eq!(*current.lock().unwrap(), None);
        ctx.stop_tracker(tracker).unwrap();
        ctx.stop_tracker(tracker).unwrap();
        framework.stop().unwrap();
    }

    #[test]
    fn test_use_tracked_services() {
        let (framework, ctx) = framework();
        let tracker = ctx
            .track_services_with_options(ServiceTrackingOptions::<u32>::new("tracked"))
            .unwrap();
        assert_eq!(ctx.use_tracked_services::<u32>(tracker, |_| {}), 0);
        ctx.register_service(Arc::new(4_u32), "tracked", Some(Properties::new().with("color", "red")))
            .unwrap();
        ctx.register_service(Arc::new(5_u32), "tracked", Some(Properties::new().with("color", "blue")))
            .unwrap();

        let mut sum = 0;
        assert_eq!(ctx.use_tracked_services::<u32>(tracker, |n| sum += *n), 2);
        assert_eq!(sum, 9);

        let mut blue = 0;
        let used = ctx.use_tracked_service_with_options(
            tracker,
            UseTrackedOptions::<u32>::new()
                .filter("(color=blue)")
                .unwrap()
                .callback(|n| blue = *n),
        );
        assert!(used);
        assert_eq!(blue, 5);

        ctx.stop_tracker(tracker).unwrap();
        assert!(!ctx.use_tracked_service::<u32>(tracker, |_| {}));
        framework.stop().unwrap();
    }

    struct PerBundle {
        gets: AtomicUsize,
        ungets: AtomicUsize,
    }

    impl ServiceFactory for PerBundle {
        fn get_service(&self, requester: BundleId, _properties: &Properties) -> Option<ServiceInstance> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Some(ServiceInstance::new(Arc::new(requester.value())))
        }

        fn unget_service(&self, _requester: BundleId, _properties: &Properties) {
            self.ungets.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_factory_instance_per_use() {
        let (framework, ctx) = framework();
        let factory = Arc::new(PerBundle {
            gets: AtomicUsize::new(0),
            ungets: AtomicUsize::new(0),
        });
        ctx.register_service_factory(factory.clone(), "factory", None).unwrap();
        let mut seen = -1;
        assert!(ctx.use_service::<i64>("factory", |v| seen = *v));
        assert_eq!(seen, BundleId::FRAMEWORK.value());
        assert_eq!(factory.gets.load(Ordering::SeqCst), 1);
        assert_eq!(factory.ungets.load(Ordering::SeqCst), 1);
        framework.stop().unwrap();
    }

    #[test]
    fn test_service_events_are_delivered() {
        let (framework, ctx) = framework();
        let events = ctx.subscribe_service_events();
        let id = ctx.register_service(Arc::new(1_u8), "evt", None).unwrap();
        ctx.unregister_service(id).unwrap();
        let first = events.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = events.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first.kind, orbis_core::ServiceEventKind::Registered);
        assert_eq!(second.kind, orbis_core::ServiceEventKind::Unregistering);
        assert_eq!(second.service_id, id);
        framework.stop().unwrap();
    }
}
