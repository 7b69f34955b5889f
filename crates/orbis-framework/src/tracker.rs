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

//! Service trackers and meta trackers.
//!
//! A tracker keeps a ranked view of the services matching its query and turns
//! registry changes into `add`/`remove`/`set` callbacks. `set` always reports
//! the highest ranked service (ties go to the oldest one). All tracker updates
//! are applied on the framework event loop, so callbacks of one tracker never
//! overlap.
//!
//! A meta tracker observes trackers instead of services, which lets a bundle
//! register a service lazily once somebody starts looking for it.

use crate::registration::{ServiceInstance, ServiceLease, ServiceReference, ServiceRegistration};
use crate::registry::ServiceQuery;
use crate::sync::{call_guarded, lock};
use orbis_core::{BundleId, Filter, FrameworkError, Properties, Result, ServiceId, TrackerId, VersionRange};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

/// A service as seen by a tracker: its reference plus the resolved object.
#[derive(Clone)]
pub struct TrackedService {
    reference: ServiceReference,
    lease: Arc<ServiceLease>,
}

impl TrackedService {
    pub(crate) fn new(reference: ServiceReference, lease: ServiceLease) -> Self {
        Self {
            reference,
            lease: Arc::new(lease),
        }
    }

    /// The service reference.
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Service id.
    pub fn id(&self) -> ServiceId {
        self.reference.id()
    }

    /// Registration properties.
    pub fn properties(&self) -> &Properties {
        self.reference.properties()
    }

    /// The bundle that registered the service.
    pub fn bundle_id(&self) -> BundleId {
        self.reference.bundle_id()
    }

    /// The type-erased service object.
    pub fn instance(&self) -> &ServiceInstance {
        self.lease.instance()
    }

    /// The service object as `Arc<S>`, if it was registered as `S`.
    pub fn downcast<S: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.instance().downcast::<S>()
    }
}

impl fmt::Debug for TrackedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedService")
            .field("id", &self.id())
            .field("name", &self.reference.name())
            .field("ranking", &self.reference.ranking())
            .finish()
    }
}

/// Downcasts a tracked service, logging when the registered type differs.
pub(crate) fn typed<S: ?Sized + Send + Sync + 'static>(
    reference: &ServiceReference,
    instance: &ServiceInstance,
) -> Option<Arc<S>> {
    let service = instance.downcast::<S>();
    if service.is_none() {
        log::warn!(
            "Service {} ('{}') was registered as {}, not {}; callback skipped",
            reference.id(),
            reference.name(),
            instance.type_name(),
            std::any::type_name::<S>()
        );
    }
    service
}

pub(crate) type ServiceCallback = Arc<dyn Fn(&TrackedService) + Send + Sync>;
pub(crate) type SetCallback = Arc<dyn Fn(Option<&TrackedService>) + Send + Sync>;
pub(crate) type CreatedCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct TrackerCallbacks {
    pub(crate) set: Vec<SetCallback>,
    pub(crate) add: Vec<ServiceCallback>,
    pub(crate) remove: Vec<ServiceCallback>,
    pub(crate) created: Vec<CreatedCallback>,
}

/// Options for [`BundleContext::track_services_with_options`](crate::BundleContext::track_services_with_options).
///
/// `S` is the type the services were registered as; typed callbacks receive
/// `Arc<S>`. Services registered under the tracked name with another type are
/// skipped with a warning.
pub struct ServiceTrackingOptions<S: ?Sized + Send + Sync + 'static> {
    query: ServiceQuery,
    callbacks: TrackerCallbacks,
    _service: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> ServiceTrackingOptions<S> {
    /// Tracks services registered under `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            query: ServiceQuery::named(service_name),
            callbacks: TrackerCallbacks::default(),
            _service: PhantomData,
        }
    }

    /// Tracks every service regardless of name. Combine with the `*_tracked`
    /// callbacks when the services have different types.
    pub fn all_services() -> Self {
        Self {
            query: ServiceQuery::any(),
            callbacks: TrackerCallbacks::default(),
            _service: PhantomData,
        }
    }

    /// Restricts tracking to services whose version lies in `range`.
    pub fn version_range(mut self, range: VersionRange) -> Self {
        self.query = self.query.with_version_range(range);
        self
    }

    /// Adds an LDAP filter over the service properties.
    pub fn filter(mut self, filter: &str) -> Result<Self> {
        self.query = self.query.with_filter_str(filter)?;
        Ok(self)
    }

    /// Adds an already parsed filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.query = self.query.with_filter(filter);
        self
    }

    /// Called with the highest ranked service, or `None` when none is left.
    pub fn on_set(self, callback: impl Fn(Option<Arc<S>>) + Send + Sync + 'static) -> Self {
        self.on_set_tracked(move |tracked| match tracked {
            Some(t) => {
                if let Some(service) = typed::<S>(t.reference(), t.instance()) {
                    callback(Some(service));
                }
            }
            None => callback(None),
        })
    }

    /// Like [`on_set`](Self::on_set), with the service properties.
    pub fn on_set_with_properties(
        self,
        callback: impl Fn(Option<(Arc<S>, &Properties)>) + Send + Sync + 'static,
    ) -> Self {
        self.on_set_tracked(move |tracked| match tracked {
            Some(t) => {
                if let Some(service) = typed::<S>(t.reference(), t.instance()) {
                    callback(Some((service, t.properties())));
                }
            }
            None => callback(None),
        })
    }

    /// Like [`on_set`](Self::on_set), with properties and the owning bundle.
    pub fn on_set_with_owner(
        self,
        callback: impl Fn(Option<(Arc<S>, &Properties, BundleId)>) + Send + Sync + 'static,
    ) -> Self {
        self.on_set_tracked(move |tracked| match tracked {
            Some(t) => {
                if let Some(service) = typed::<S>(t.reference(), t.instance()) {
                    callback(Some((service, t.properties(), t.bundle_id())));
                }
            }
            None => callback(None),
        })
    }

    /// Untyped `set` callback.
    pub fn on_set_tracked(
        mut self,
        callback: impl Fn(Option<&TrackedService>) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.set.push(Arc::new(callback));
        self
    }

    /// Called for every service entering the tracked set.
    pub fn on_add(self, callback: impl Fn(Arc<S>) + Send + Sync + 'static) -> Self {
        self.on_add_tracked(move |t| {
            if let Some(service) = typed::<S>(t.reference(), t.instance()) {
                callback(service);
            }
        })
    }

    /// Like [`on_add`](Self::on_add), with the service properties.
    pub fn on_add_with_properties(
        self,
        callback: impl Fn(Arc<S>, &Properties) + Send + Sync + 'static,
    ) -> Self {
        self.on_add_tracked(move |t| {
            if let Some(service) = typed::<S>(t.reference(), t.instance()) {
                callback(service, t.properties());
            }
        })
    }

    /// Like [`on_add`](Self::on_add), with properties and the owning bundle.
    pub fn on_add_with_owner(
        self,
        callback: impl Fn(Arc<S>, &Properties, BundleId) + Send + Sync + 'static,
    ) -> Self {
        self.on_add_tracked(move |t| {
            if let Some(service) = typed::<S>(t.reference(), t.instance()) {
                callback(service, t.properties(), t.bundle_id());
            }
        })
    }

    /// Untyped `add` callback.
    pub fn on_add_tracked(mut self, callback: impl Fn(&TrackedService) + Send + Sync + 'static) -> Self {
        self.callbacks.add.push(Arc::new(callback));
        self
    }

    /// Called for every service leaving the tracked set.
    pub fn on_remove(self, callback: impl Fn(Arc<S>) + Send + Sync + 'static) -> Self {
        self.on_remove_tracked(move |t| {
            if let Some(service) = typed::<S>(t.reference(), t.instance()) {
                callback(service);
            }
        })
    }

    /// Like [`on_remove`](Self::on_remove), with the service properties.
    pub fn on_remove_with_properties(
        self,
        callback: impl Fn(Arc<S>, &Properties) + Send + Sync + 'static,
    ) -> Self {
        self.on_remove_tracked(move |t| {
            if let Some(service) = typed::<S>(t.reference(), t.instance()) {
                callback(service, t.properties());
            }
        })
    }

    /// Like [`on_remove`](Self::on_remove), with properties and the owning bundle.
    pub fn on_remove_with_owner(
        self,
        callback: impl Fn(Arc<S>, &Properties, BundleId) + Send + Sync + 'static,
    ) -> Self {
        self.on_remove_tracked(move |t| {
            if let Some(service) = typed::<S>(t.reference(), t.instance()) {
                callback(service, t.properties(), t.bundle_id());
            }
        })
    }

    /// Untyped `remove` callback.
    pub fn on_remove_tracked(
        mut self,
        callback: impl Fn(&TrackedService) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.remove.push(Arc::new(callback));
        self
    }

    /// Called once the tracker has ingested the services already registered.
    pub fn on_created(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.callbacks.created.push(Arc::new(callback));
        self
    }

    pub(crate) fn into_parts(self) -> Result<(ServiceQuery, TrackerCallbacks)> {
        self.query.validate()?;
        Ok((self.query, self.callbacks))
    }
}

#[derive(Default)]
struct TrackerState {
    /// Kept in rank order; the first entry is the highest ranked service.
    tracked: Vec<TrackedService>,
    highest: Option<ServiceId>,
    opened: bool,
    closed: bool,
}

/// The registry-side state of one tracker.
pub(crate) struct TrackerCore {
    pub(crate) id: TrackerId,
    pub(crate) bundle_id: BundleId,
    pub(crate) query: ServiceQuery,
    callbacks: TrackerCallbacks,
    state: Mutex<TrackerState>,
}

impl TrackerCore {
    pub(crate) fn new(
        id: TrackerId,
        bundle_id: BundleId,
        query: ServiceQuery,
        callbacks: TrackerCallbacks,
    ) -> Self {
        Self {
            id,
            bundle_id,
            query,
            callbacks,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub(crate) fn info(&self) -> ServiceTrackerInfo {
        ServiceTrackerInfo {
            tracker_id: self.id,
            bundle_id: self.bundle_id,
            service_name: self.query.name().map(str::to_string),
            filter: self.query.filter_string(),
        }
    }

    /// Ingests the services registered before the tracker, in registration
    /// order, then reports the highest one through `set` exactly once.
    pub(crate) fn open(&self, existing: &[Arc<ServiceRegistration>]) {
        for registration in existing {
            self.add_service(registration);
        }
        let highest = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.opened = true;
            let highest = state.tracked.first().cloned();
            state.highest = highest.as_ref().map(TrackedService::id);
            highest
        };
        if let Some(highest) = highest {
            self.fire_set(Some(&highest));
        }
        for created in &self.callbacks.created {
            call_guarded(&format!("tracker {} created callback", self.id), || created());
        }
        log::debug!(
            "Tracker {} of bundle {} opened for {}",
            self.id,
            self.bundle_id,
            self.query
        );
    }

    pub(crate) fn add_service(&self, registration: &Arc<ServiceRegistration>) {
        if registration.is_removed() {
            return;
        }
        {
            let state = lock(&self.state);
            if state.closed || state.tracked.iter().any(|t| t.id() == registration.id) {
                return;
            }
        }
        // resolved outside the state lock: a factory runs user code
        let Some(lease) = registration.lease(self.bundle_id) else {
            log::debug!(
                "Tracker {}: factory of service {} returned no instance",
                self.id,
                registration.id
            );
            return;
        };
        let service = TrackedService::new(ServiceReference::new(Arc::clone(registration)), lease);

        let new_highest = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            let position = state
                .tracked
                .partition_point(|t| t.reference().rank_cmp(service.reference()) == Ordering::Less);
            state.tracked.insert(position, service.clone());
            let first = state.tracked.first().cloned();
            let first_id = first.as_ref().map(TrackedService::id);
            if state.opened && first_id != state.highest {
                state.highest = first_id;
                first
            } else {
                None
            }
        };

        self.fire(&self.callbacks.add, &service, "add");
        if let Some(highest) = new_highest {
            self.fire_set(Some(&highest));
        }
    }

    pub(crate) fn remove_service(&self, id: ServiceId) {
        let (removed, set_change) = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            let Some(position) = state.tracked.iter().position(|t| t.id() == id) else {
                return;
            };
            let removed = state.tracked.remove(position);
            let set_change = if state.opened && state.highest == Some(id) {
                let next = state.tracked.first().cloned();
                state.highest = next.as_ref().map(TrackedService::id);
                Some(next)
            } else {
                None
            };
            (removed, set_change)
        };

        self.fire(&self.callbacks.remove, &removed, "remove");
        if let Some(next) = set_change {
            self.fire_set(next.as_ref());
        }
    }

    /// Releases every tracked service, lowest rank first, then clears `set`.
    /// No callback fires after this returns.
    pub(crate) fn close(&self) {
        let (tracked, had_highest) = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            let had_highest = state.highest.take().is_some();
            (std::mem::take(&mut state.tracked), had_highest)
        };
        for service in tracked.iter().rev() {
            self.fire(&self.callbacks.remove, service, "remove");
        }
        if had_highest {
            self.fire_set(None);
        }
        log::debug!("Tracker {} of bundle {} closed", self.id, self.bundle_id);
    }

    /// Copy of the tracked services in rank order.
    pub(crate) fn snapshot(&self) -> Vec<TrackedService> {
        lock(&self.state).tracked.clone()
    }

    pub(crate) fn tracked_count(&self) -> usize {
        lock(&self.state).tracked.len()
    }

    fn fire(&self, callbacks: &[ServiceCallback], service: &TrackedService, what: &str) {
        for callback in callbacks {
            call_guarded(
                &format!("tracker {} {what} callback for service {}", self.id, service.id()),
                || callback(service),
            );
        }
    }

    fn fire_set(&self, service: Option<&TrackedService>) {
        for callback in &self.callbacks.set {
            call_guarded(&format!("tracker {} set callback", self.id), || callback(service));
        }
    }
}

/// Describes a service tracker to meta trackers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceTrackerInfo {
    /// Id of the observed tracker.
    pub tracker_id: TrackerId,
    /// Bundle that created it.
    pub bundle_id: BundleId,
    /// Tracked service name; `None` when it tracks every service.
    pub service_name: Option<String>,
    /// The complete filter the tracker applies, name included.
    pub filter: Option<String>,
}

type TrackerInfoCallback = Arc<dyn Fn(&ServiceTrackerInfo) + Send + Sync>;

/// Options for [`BundleContext::track_service_trackers`](crate::BundleContext::track_service_trackers).
#[derive(Default)]
pub struct MetaTrackerOptions {
    service_name: Option<String>,
    on_added: Vec<TrackerInfoCallback>,
    on_removed: Vec<TrackerInfoCallback>,
}

impl MetaTrackerOptions {
    /// Observes trackers of `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: Some(service_name.into()),
            ..Self::default()
        }
    }

    /// Observes every tracker.
    pub fn all() -> Self {
        Self::default()
    }

    /// Called when a matching tracker is opened, and once per tracker that
    /// already exists when the meta tracker starts.
    pub fn on_tracker_added(mut self, callback: impl Fn(&ServiceTrackerInfo) + Send + Sync + 'static) -> Self {
        self.on_added.push(Arc::new(callback));
        self
    }

    /// Called when a matching tracker is stopped.
    pub fn on_tracker_removed(
        mut self,
        callback: impl Fn(&ServiceTrackerInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_removed.push(Arc::new(callback));
        self
    }

    pub(crate) fn build(self, id: TrackerId, bundle_id: BundleId) -> Result<MetaTracker> {
        if self.service_name.as_deref() == Some("") {
            return Err(FrameworkError::illegal_argument(
                "meta tracker service name must not be empty",
            ));
        }
        Ok(MetaTracker {
            id,
            bundle_id,
            service_name: self.service_name,
            on_added: self.on_added,
            on_removed: self.on_removed,
        })
    }
}

pub(crate) struct MetaTracker {
    pub(crate) id: TrackerId,
    pub(crate) bundle_id: BundleId,
    service_name: Option<String>,
    on_added: Vec<TrackerInfoCallback>,
    on_removed: Vec<TrackerInfoCallback>,
}

impl MetaTracker {
    pub(crate) fn observes(&self, info: &ServiceTrackerInfo) -> bool {
        self.service_name.is_none() || self.service_name == info.service_name
    }

    pub(crate) fn tracker_added(&self, info: &ServiceTrackerInfo) {
        for callback in &self.on_added {
            call_guarded(&format!("meta tracker {} added callback", self.id), || callback(info));
        }
    }

    pub(crate) fn tracker_removed(&self, info: &ServiceTrackerInfo) {
        for callback in &self.on_removed {
            call_guarded(&format!("meta tracker {} removed callback", self.id), || callback(info));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::ServiceSource;
    use orbis_core::constants::SERVICE_NAME;

    type Log = Arc<Mutex<Vec<String>>>;

    fn registration(id: i64, ranking: i64) -> Arc<ServiceRegistration> {
        Arc::new(ServiceRegistration::new(
            ServiceId::new(id),
            "calc".into(),
            BundleId::FRAMEWORK,
            Properties::new().with(SERVICE_NAME, "calc"),
            ranking,
            None,
            ServiceSource::Instance(ServiceInstance::new(Arc::new(id))),
        ))
    }

    fn recording_tracker(log: &Log) -> TrackerCore {
        let (query, callbacks) = ServiceTrackingOptions::<i64>::new("calc")
            .on_add({
                let log = log.clone();
                move |v| log.lock().unwrap().push(format!("add {v}"))
            })
            .on_remove({
                let log = log.clone();
                move |v| log.lock().unwrap().push(format!("remove {v}"))
            })
            .on_set({
                let log = log.clone();
                move |v| {
                    let text = v.map_or("none".to_string(), |v| v.to_string());
                    log.lock().unwrap().push(format!("set {text}"));
                }
            })
            .on_created({
                let log = log.clone();
                move || log.lock().unwrap().push("created".into())
            })
            .into_parts()
            .unwrap();
        TrackerCore::new(TrackerId::new(1), BundleId::FRAMEWORK, query, callbacks)
    }

    fn take(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[test]
    fn test_open_sets_highest_once() {
        let log = Log::default();
        let tracker = recording_tracker(&log);
        tracker.open(&[registration(1, 0), registration(2, 5), registration(3, 0)]);
        assert_eq!(take(&log), ["add 1", "add 2", "add 3", "set 2", "created"]);
        let order: Vec<_> = tracker.snapshot().iter().map(|t| t.id().value()).collect();
        assert_eq!(order, [2, 1, 3]);
    }

    #[test]
    fn test_set_follows_ranking_changes() {
        let log = Log::default();
        let tracker = recording_tracker(&log);
        tracker.open(&[]);
        assert_eq!(take(&log), ["created"]);

        let low = registration(1, 0);
        let high = registration(2, 10);
        tracker.add_service(&low);
        tracker.add_service(&high);
        tracker.add_service(&registration(3, 0));
        assert_eq!(take(&log), ["add 1", "set 1", "add 2", "set 2", "add 3"]);

        tracker.remove_service(high.id);
        assert_eq!(take(&log), ["remove 2", "set 1"]);
        tracker.remove_service(ServiceId::new(3));
        assert_eq!(take(&log), ["remove 3"]);
        tracker.remove_service(low.id);
        assert_eq!(take(&log), ["remove 1", "set none"]);
    }

    #[test]
    fn test_close_removes_lowest_first_and_silences() {
        let log = Log::default();
        let tracker = recording_tracker(&log);
        tracker.open(&[registration(1, 0), registration(2, 10)]);
        take(&log);
        tracker.close();
        assert_eq!(take(&log), ["remove 1", "remove 2", "set none"]);
        tracker.add_service(&registration(3, 0));
        tracker.close();
        assert!(take(&log).is_empty());
    }

    #[test]
    fn test_removed_registration_is_not_tracked() {
        let log = Log::default();
        let tracker = recording_tracker(&log);
        tracker.open(&[]);
        let reg = registration(1, 0);
        reg.mark_removed();
        tracker.add_service(&reg);
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_delivery() {
        let log = Log::default();
        let (query, callbacks) = ServiceTrackingOptions::<i64>::new("calc")
            .on_add(|_| panic!("bad callback"))
            .on_add({
                let log = log.clone();
                move |v| log.lock().unwrap().push(format!("add {v}"))
            })
            .into_parts()
            .unwrap();
        let tracker = TrackerCore::new(TrackerId::new(1), BundleId::FRAMEWORK, query, callbacks);
        tracker.open(&[registration(4, 0)]);
        assert_eq!(take(&log), ["add 4"]);
    }

    #[test]
    fn test_type_mismatch_skips_typed_callbacks() {
        let log = Log::default();
        let (query, callbacks) = ServiceTrackingOptions::<String>::new("calc")
            .on_add(|_| panic!("must not be called"))
            .on_add_tracked({
                let log = log.clone();
                move |t| log.lock().unwrap().push(format!("raw {}", t.id()))
            })
            .into_parts()
            .unwrap();
        let tracker = TrackerCore::new(TrackerId::new(1), BundleId::FRAMEWORK, query, callbacks);
        tracker.open(&[registration(7, 0)]);
        assert_eq!(take(&log), ["raw 7"]);
    }

    #[test]
    fn test_empty_service_name_is_rejected() {
        let err = ServiceTrackingOptions::<i64>::new("").into_parts().err().unwrap();
        assert_eq!(err.status(), orbis_core::Status::IllegalArgument);
        assert!(ServiceTrackingOptions::<i64>::new("calc").filter("(broken").is_err());
    }

    #[test]
    fn test_meta_tracker_matching() {
        let meta = MetaTrackerOptions::new("calc").build(TrackerId::new(9), BundleId::FRAMEWORK).unwrap();
        let info = |name: Option<&str>| ServiceTrackerInfo {
            tracker_id: TrackerId::new(1),
            bundle_id: BundleId::FRAMEWORK,
            service_name: name.map(str::to_string),
            filter: None,
        };
        assert!(meta.observes(&info(Some("calc"))));
        assert!(!meta.observes(&info(Some("shell"))));
        assert!(!meta.observes(&info(None)));
        let all = MetaTrackerOptions::all().build(TrackerId::new(10), BundleId::FRAMEWORK).unwrap();
        assert!(all.observes(&info(None)));
        assert!(MetaTrackerOptions::new("").build(TrackerId::new(11), BundleId::FRAMEWORK).is_err());
    }
}
