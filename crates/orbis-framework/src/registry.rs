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

//! The service registry: the single source of truth for which services exist.
//!
//! Mutations (`apply_*`) are invoked from the framework event loop only; reads
//! take a short read lock from any thread. Tracker callbacks are always
//! delivered after the registry lock has been released.

use crate::event_loop::Completion;
use crate::registration::{ServiceReference, ServiceRegistration, ServiceSource};
use crate::sync::{lock, read, write};
use crate::tracker::{MetaTracker, ServiceTrackerInfo, TrackerCore};
use orbis_core::constants::{
    SERVICE_BUNDLE_ID, SERVICE_ID, SERVICE_NAME, SERVICE_RANKING, SERVICE_SCOPE, SERVICE_VERSION,
};
use orbis_core::{
    BundleId, EventBus, Filter, FrameworkError, Properties, PropertyValue, Result, ServiceEvent,
    ServiceEventKind, ServiceId, TrackerId, Version, VersionRange,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Selects services by name, version range and LDAP filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceQuery {
    name: Option<String>,
    version_range: Option<VersionRange>,
    filter: Option<Filter>,
}

impl ServiceQuery {
    /// Services registered under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            version_range: None,
            filter: None,
        }
    }

    /// Every service.
    pub fn any() -> Self {
        Self {
            name: None,
            version_range: None,
            filter: None,
        }
    }

    /// Only services whose `service.version` lies in `range`. Services
    /// without a version never match.
    pub fn with_version_range(mut self, range: VersionRange) -> Self {
        self.version_range = Some(range);
        self
    }

    /// Parses and adds a filter over the service properties.
    pub fn with_filter_str(self, filter: &str) -> Result<Self> {
        Ok(self.with_filter(Filter::parse(filter)?))
    }

    /// Adds a filter over the service properties.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// The service name, `None` for a query over every service.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Rejects an empty service name.
    pub fn validate(&self) -> Result<()> {
        match self.name.as_deref() {
            Some(name) if name.trim().is_empty() => Err(FrameworkError::illegal_argument(
                "service name must not be empty",
            )),
            _ => Ok(()),
        }
    }

    /// The whole query as one LDAP filter string, `None` when it matches all.
    pub fn filter_string(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(name) = &self.name {
            parts.push(Filter::equals(SERVICE_NAME, name.as_str()));
        }
        if let Some(range) = self.version_range.as_ref().and_then(|r| r.to_filter(SERVICE_VERSION)) {
            parts.push(range);
        }
        if let Some(filter) = &self.filter {
            parts.push(filter.clone());
        }
        Filter::all_of(parts).map(|f| f.to_string())
    }

    pub(crate) fn matches(&self, registration: &ServiceRegistration) -> bool {
        if let Some(name) = &self.name {
            if registration.name != *name {
                return false;
            }
        }
        if let Some(range) = &self.version_range {
            match &registration.version {
                Some(version) if range.contains(version) => {}
                _ => return false,
            }
        }
        self.filter
            .as_ref()
            .map_or(true, |f| f.matches(&registration.properties))
    }
}

impl fmt::Display for ServiceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.filter_string() {
            Some(filter) => f.write_str(&filter),
            None => f.write_str("<all services>"),
        }
    }
}

/// Kind of a queued asynchronous operation, used to find its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PendingKind {
    Registration,
    Unregistration,
    TrackerStart,
    TrackerStop,
}

#[derive(Default)]
struct RegistryState {
    services: BTreeMap<ServiceId, Arc<ServiceRegistration>>,
    trackers: BTreeMap<TrackerId, Arc<TrackerCore>>,
    meta_trackers: BTreeMap<TrackerId, Arc<MetaTracker>>,
}

/// Registry of the services, trackers and meta trackers of one framework.
pub struct ServiceRegistry {
    next_service_id: AtomicI64,
    next_tracker_id: AtomicI64,
    state: RwLock<RegistryState>,
    generation: Mutex<u64>,
    changed: Condvar,
    pending: Mutex<HashMap<(PendingKind, i64), Completion>>,
    events: EventBus<ServiceEvent>,
}

impl ServiceRegistry {
    /// Creates an empty registry. Ids start at 1.
    pub fn new() -> Self {
        Self {
            next_service_id: AtomicI64::new(1),
            next_tracker_id: AtomicI64::new(1),
            state: RwLock::new(RegistryState::default()),
            generation: Mutex::new(0),
            changed: Condvar::new(),
            pending: Mutex::new(HashMap::new()),
            events: EventBus::new(),
        }
    }

    pub(crate) fn next_service_id(&self) -> ServiceId {
        ServiceId::new(self.next_service_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn next_tracker_id(&self) -> TrackerId {
        TrackerId::new(self.next_tracker_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Validates a registration request and builds the registration with its
    /// reserved properties. Nothing becomes visible until
    /// [`apply_register`](Self::apply_register).
    ///
    /// `service.ranking` and `service.version` given as strings are retyped
    /// when they parse; otherwise they stay strings and count as ranking 0 and
    /// no version.
    pub(crate) fn create_registration(
        &self,
        id: ServiceId,
        name: &str,
        bundle_id: BundleId,
        properties: Option<Properties>,
        source: ServiceSource,
    ) -> Result<Arc<ServiceRegistration>> {
        if name.trim().is_empty() {
            return Err(FrameworkError::illegal_argument("service name must not be empty"));
        }
        let mut properties = properties.unwrap_or_default();
        properties.set(SERVICE_NAME, name);
        properties.set(SERVICE_ID, id.value());
        properties.set(SERVICE_BUNDLE_ID, bundle_id.value());
        properties.set(SERVICE_SCOPE, source.scope());

        let ranking = match properties.get(SERVICE_RANKING).cloned() {
            None => {
                properties.set(SERVICE_RANKING, 0_i64);
                0
            }
            Some(PropertyValue::Long(ranking)) => ranking,
            Some(PropertyValue::String(text)) => match text.trim().parse::<i64>() {
                Ok(ranking) => {
                    properties.set(SERVICE_RANKING, ranking);
                    ranking
                }
                Err(_) => {
                    log::warn!("Service '{name}': ranking '{text}' is not a number, using 0");
                    0
                }
            },
            Some(other) => {
                log::warn!(
                    "Service '{name}': ranking of type {} is not supported, using 0",
                    other.type_name()
                );
                0
            }
        };

        let version = match properties.get(SERVICE_VERSION).cloned() {
            None => None,
            Some(PropertyValue::Version(version)) => Some(version),
            Some(PropertyValue::String(text)) => match Version::parse(&text) {
                Ok(version) => {
                    properties.set(SERVICE_VERSION, version.clone());
                    Some(version)
                }
                Err(_) => {
                    log::warn!("Service '{name}': version '{text}' does not parse, ignoring it");
                    None
                }
            },
            Some(other) => {
                log::warn!(
                    "Service '{name}': version of type {} is not supported, ignoring it",
                    other.type_name()
                );
                None
            }
        };

        Ok(Arc::new(ServiceRegistration::new(
            id,
            name.to_string(),
            bundle_id,
            properties,
            ranking,
            version,
            source,
        )))
    }

    /// Makes a registration visible and tells matching trackers.
    pub(crate) fn apply_register(&self, registration: Arc<ServiceRegistration>) {
        let trackers: Vec<Arc<TrackerCore>> = {
            let mut state = write(&self.state);
            state
                .services
                .insert(registration.id, Arc::clone(&registration));
            state
                .trackers
                .values()
                .filter(|t| t.query.matches(&registration))
                .cloned()
                .collect()
        };
        self.bump_generation();
        log::debug!(
            "Registered service {} '{}' (bundle {}, ranking {})",
            registration.id,
            registration.name,
            registration.bundle_id,
            registration.ranking
        );
        for tracker in trackers {
            tracker.add_service(&registration);
        }
        self.publish(ServiceEventKind::Registered, &registration);
    }

    /// Removes a service, marks it unusable and tells the trackers.
    ///
    /// Returns the registration so that a synchronous caller can wait for
    /// in-flight uses to drain, or `None` when the id is unknown.
    pub(crate) fn apply_unregister(&self, id: ServiceId) -> Option<Arc<ServiceRegistration>> {
        let (registration, trackers) = {
            let mut state = write(&self.state);
            let registration = state.services.remove(&id)?;
            registration.mark_removed();
            let trackers: Vec<Arc<TrackerCore>> = state.trackers.values().cloned().collect();
            (registration, trackers)
        };
        self.bump_generation();
        log::debug!(
            "Unregistered service {} '{}' (bundle {})",
            registration.id,
            registration.name,
            registration.bundle_id
        );
        for tracker in trackers {
            tracker.remove_service(id);
        }
        self.publish(ServiceEventKind::Unregistering, &registration);
        Some(registration)
    }

    /// Adds a tracker, feeds it the matching services in registration order
    /// and announces it to meta trackers.
    pub(crate) fn apply_open_tracker(&self, tracker: Arc<TrackerCore>) {
        let (existing, metas) = {
            let mut state = write(&self.state);
            state.trackers.insert(tracker.id, Arc::clone(&tracker));
            let existing: Vec<_> = state
                .services
                .values()
                .filter(|r| tracker.query.matches(r))
                .cloned()
                .collect();
            let metas: Vec<_> = state.meta_trackers.values().cloned().collect();
            (existing, metas)
        };
        tracker.open(&existing);
        let info = tracker.info();
        for meta in metas.iter().filter(|m| m.observes(&info)) {
            meta.tracker_added(&info);
        }
    }

    /// Removes and closes a tracker. Returns `false` for an unknown id.
    pub(crate) fn apply_close_tracker(&self, id: TrackerId) -> bool {
        let (tracker, metas) = {
            let mut state = write(&self.state);
            let Some(tracker) = state.trackers.remove(&id) else {
                return false;
            };
            let metas: Vec<_> = state.meta_trackers.values().cloned().collect();
            (tracker, metas)
        };
        tracker.close();
        let info = tracker.info();
        for meta in metas.iter().filter(|m| m.observes(&info)) {
            meta.tracker_removed(&info);
        }
        true
    }

    /// Adds a meta tracker and reports the trackers that already exist.
    pub(crate) fn apply_open_meta_tracker(&self, meta: Arc<MetaTracker>) {
        let existing: Vec<ServiceTrackerInfo> = {
            let mut state = write(&self.state);
            state.meta_trackers.insert(meta.id, Arc::clone(&meta));
            state.trackers.values().map(|t| t.info()).collect()
        };
        for info in existing.iter().filter(|i| meta.observes(i)) {
            meta.tracker_added(info);
        }
        log::debug!("Meta tracker {} of bundle {} opened", meta.id, meta.bundle_id);
    }

    pub(crate) fn apply_close_meta_tracker(&self, id: TrackerId) -> bool {
        write(&self.state).meta_trackers.remove(&id).is_some()
    }

    /// Matching services in rank order (highest ranking first, then oldest).
    pub fn find(&self, query: &ServiceQuery) -> Vec<ServiceReference> {
        let state = read(&self.state);
        let mut found: Vec<_> = state
            .services
            .values()
            .filter(|r| query.matches(r))
            .map(|r| ServiceReference::new(Arc::clone(r)))
            .collect();
        found.sort_by(ServiceReference::rank_cmp);
        found
    }

    /// The id of the best match, if any.
    pub fn find_best(&self, query: &ServiceQuery) -> Option<ServiceId> {
        let state = read(&self.state);
        state
            .services
            .values()
            .filter(|r| query.matches(r))
            .min_by(|a, b| a.rank_cmp(b))
            .map(|r| r.id)
    }

    /// Reference to a registered service.
    pub fn reference(&self, id: ServiceId) -> Option<ServiceReference> {
        read(&self.state)
            .services
            .get(&id)
            .map(|r| ServiceReference::new(Arc::clone(r)))
    }

    pub(crate) fn tracker(&self, id: TrackerId) -> Option<Arc<TrackerCore>> {
        read(&self.state).trackers.get(&id).cloned()
    }

    /// Returns `true` if a tracker or meta tracker with this id is open.
    pub fn has_tracker(&self, id: TrackerId) -> bool {
        let state = read(&self.state);
        state.trackers.contains_key(&id) || state.meta_trackers.contains_key(&id)
    }

    pub(crate) fn is_meta_tracker(&self, id: TrackerId) -> bool {
        read(&self.state).meta_trackers.contains_key(&id)
    }

    /// Ids of the services registered by `bundle_id`, oldest first.
    pub fn services_of_bundle(&self, bundle_id: BundleId) -> Vec<ServiceId> {
        read(&self.state)
            .services
            .values()
            .filter(|r| r.bundle_id == bundle_id)
            .map(|r| r.id)
            .collect()
    }

    /// Ids of the trackers and meta trackers opened by `bundle_id`.
    pub fn trackers_of_bundle(&self, bundle_id: BundleId) -> Vec<TrackerId> {
        let state = read(&self.state);
        state
            .trackers
            .values()
            .filter(|t| t.bundle_id == bundle_id)
            .map(|t| t.id)
            .chain(
                state
                    .meta_trackers
                    .values()
                    .filter(|m| m.bundle_id == bundle_id)
                    .map(|m| m.id),
            )
            .collect()
    }

    /// Number of registered services.
    pub fn service_count(&self) -> usize {
        read(&self.state).services.len()
    }

    /// Number of open trackers, meta trackers included.
    pub fn tracker_count(&self) -> usize {
        let state = read(&self.state);
        state.trackers.len() + state.meta_trackers.len()
    }

    /// Subscribes to service events published after this call.
    pub fn subscribe(&self) -> flume::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// Counter bumped on every registration change.
    pub(crate) fn generation(&self) -> u64 {
        *lock(&self.generation)
    }

    /// Blocks until the generation moves past `seen` or `deadline` passes.
    /// Returns `false` on timeout.
    pub(crate) fn wait_for_change(&self, seen: u64, deadline: Instant) -> bool {
        let mut generation = lock(&self.generation);
        while *generation == seen {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            generation = self
                .changed
                .wait_timeout(generation, deadline - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|p| p.into_inner().0);
        }
        true
    }

    pub(crate) fn add_pending(&self, kind: PendingKind, id: i64, completion: Completion) {
        lock(&self.pending).insert((kind, id), completion);
    }

    pub(crate) fn pending(&self, kind: PendingKind, id: i64) -> Option<Completion> {
        lock(&self.pending).get(&(kind, id)).cloned()
    }

    pub(crate) fn remove_pending(&self, kind: PendingKind, id: i64) -> Option<Completion> {
        lock(&self.pending).remove(&(kind, id))
    }

    /// Waits for a queued operation; returns at once when none is pending.
    pub(crate) fn wait_pending(&self, kind: PendingKind, id: i64, timeout: Option<Duration>) -> bool {
        let Some(completion) = self.pending(kind, id) else {
            return true;
        };
        match timeout {
            Some(timeout) => completion.wait_timeout(timeout).is_some(),
            None => {
                completion.wait();
                true
            }
        }
    }

    fn bump_generation(&self) {
        *lock(&self.generation) += 1;
        self.changed.notify_all();
    }

    fn publish(&self, kind: ServiceEventKind, registration: &ServiceRegistration) {
        self.events.publish(ServiceEvent {
            kind,
            service_id: registration.id,
            service_name: registration.name.clone(),
            bundle_id: registration.bundle_id,
            properties: registration.properties.clone(),
        });
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
