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

//! The component state machine.
//!
//! All transitions run on the framework event loop: dependency trackers feed
//! events into a per-component queue and a single pump drains it. Events that
//! arrive while a transition is in progress (for instance because `start`
//! registered a service) are queued and handled once the transition is over,
//! so user callbacks never observe a half-applied transition.

use crate::dependency::{Dependency, DependencyStrategy};
use crate::info::{ComponentInfo, DependencyInfo, InterfaceInfo};
use crate::state::ComponentState;
use orbis_core::constants::{COMPONENT_UUID, SERVICE_VERSION};
use orbis_core::{FrameworkError, Properties, Result, ServiceId, TrackerId, Version};
use orbis_framework::{BundleContext, RegistrationOptions, ServiceInstance, TrackedService};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type LifecycleFn<T> = Box<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Identifies a dependency within its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DependencyId(pub(crate) u64);

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct Lifecycle<T> {
    pub(crate) init: Option<LifecycleFn<T>>,
    pub(crate) start: Option<LifecycleFn<T>>,
    pub(crate) stop: Option<LifecycleFn<T>>,
    pub(crate) deinit: Option<LifecycleFn<T>>,
}

impl<T> Default for Lifecycle<T> {
    fn default() -> Self {
        Self {
            init: None,
            start: None,
            stop: None,
            deinit: None,
        }
    }
}

pub(crate) struct ProvidedInterface {
    pub(crate) name: String,
    pub(crate) instance: ServiceInstance,
    pub(crate) version: Option<Version>,
    pub(crate) properties: Properties,
    pub(crate) registered: Option<ServiceId>,
}

enum Binding {
    /// The highest ranked service changed from `previous` to `current`.
    Set {
        previous: Option<TrackedService>,
        current: Option<TrackedService>,
    },
    Add(TrackedService),
    Remove(TrackedService),
}

struct Delivery<T> {
    dependency: Arc<Dependency<T>>,
    calls: Vec<Binding>,
}

struct DependencySlot<T> {
    id: DependencyId,
    dependency: Arc<Dependency<T>>,
    tracker: Option<TrackerId>,
    /// Every matching service, best first.
    tracked: Vec<TrackedService>,
    /// The services the component has been told about, best first.
    bound: Vec<TrackedService>,
    bound_highest: Option<TrackedService>,
}

impl<T> DependencySlot<T> {
    fn new(id: DependencyId, dependency: Dependency<T>) -> Self {
        Self {
            id,
            dependency: Arc::new(dependency),
            tracker: None,
            tracked: Vec::new(),
            bound: Vec::new(),
            bound_highest: None,
        }
    }

    /// Whether changes of this dependency are delivered to the component in
    /// `state`. Required dependencies are bound from `init` on, optional ones
    /// only once the component is active.
    fn delivers_in(&self, state: ComponentState) -> bool {
        if self.dependency.required {
            state.is_instantiated()
        } else {
            state.is_active()
        }
    }

    fn bind(&mut self) -> Delivery<T> {
        self.bound = self.tracked.clone();
        self.bound_highest = self.bound.first().cloned();
        let mut calls = Vec::with_capacity(self.bound.len() + 1);
        if let Some(highest) = &self.bound_highest {
            calls.push(Binding::Set {
                previous: None,
                current: Some(highest.clone()),
            });
        }
        calls.extend(self.bound.iter().cloned().map(Binding::Add));
        self.delivery(calls)
    }

    fn unbind(&mut self) -> Delivery<T> {
        let mut calls: Vec<Binding> = self.bound.drain(..).rev().map(Binding::Remove).collect();
        if let Some(previous) = self.bound_highest.take() {
            calls.push(Binding::Set {
                previous: Some(previous),
                current: None,
            });
        }
        self.delivery(calls)
    }

    /// Recomputes the highest bound service after `bound` changed.
    fn refresh_highest(&mut self, calls: &mut Vec<Binding>) {
        let highest = self.bound.first().map(TrackedService::id);
        if highest != self.bound_highest.as_ref().map(TrackedService::id) {
            let current = self.bound.first().cloned();
            let previous = std::mem::replace(&mut self.bound_highest, current.clone());
            calls.push(Binding::Set { previous, current });
        }
    }

    fn delivery(&self, calls: Vec<Binding>) -> Delivery<T> {
        Delivery {
            dependency: Arc::clone(&self.dependency),
            calls,
        }
    }
}

fn insert_ranked(services: &mut Vec<TrackedService>, service: TrackedService) {
    let position = services
        .partition_point(|s| s.reference().rank_cmp(service.reference()) == Ordering::Less);
    services.insert(position, service);
}

enum DependencyEvent {
    Added(DependencyId, TrackedService),
    Removed(DependencyId, ServiceId),
}

enum Reaction<T> {
    Nothing,
    Deliver(Delivery<T>),
    Rebuild,
}

struct Machine<T> {
    state: ComponentState,
    context: Option<BundleContext>,
    removing: bool,
    busy: bool,
    events: VecDeque<DependencyEvent>,
    interfaces: Vec<ProvidedInterface>,
    dependencies: Vec<DependencySlot<T>>,
    next_dependency_id: u64,
    generation: u64,
    last_error: Option<String>,
}

impl<T> Machine<T> {
    fn required_satisfied(&self) -> bool {
        self.dependencies
            .iter()
            .filter(|slot| slot.dependency.required)
            .all(|slot| !slot.tracked.is_empty())
    }

    fn slot_mut(&mut self, id: DependencyId) -> Option<&mut DependencySlot<T>> {
        self.dependencies.iter_mut().find(|slot| slot.id == id)
    }

    fn add_dependency(&mut self, dependency: Dependency<T>) -> DependencyId {
        let id = DependencyId(self.next_dependency_id);
        self.next_dependency_id += 1;
        self.dependencies.push(DependencySlot::new(id, dependency));
        id
    }
}

/// Type-erased view of a managed component, as held by the manager.
pub(crate) trait ManagedComponent: Send + Sync {
    fn uuid(&self) -> &str;
    fn name(&self) -> &str;
    fn state(&self) -> ComponentState;
    fn info(&self) -> ComponentInfo;
    /// Starts tracking the dependencies and drives the component as far as
    /// they allow. Errors of `init`/`start` are returned, the component stays
    /// managed.
    fn enable(self: Arc<Self>, context: &BundleContext) -> Result<()>;
    /// Tears the component down: stop trackers, `stop`, `deinit`, unregister
    /// the provided interfaces.
    fn disable(&self) -> Result<()>;
}

pub(crate) struct ComponentCore<T> {
    uuid: String,
    name: String,
    implementation: Arc<T>,
    lifecycle: Lifecycle<T>,
    machine: Mutex<Machine<T>>,
}

impl<T: Send + Sync + 'static> ComponentCore<T> {
    pub(crate) fn new(
        uuid: String,
        name: String,
        implementation: Arc<T>,
        lifecycle: Lifecycle<T>,
        interfaces: Vec<ProvidedInterface>,
        dependencies: Vec<Dependency<T>>,
    ) -> Self {
        let mut machine = Machine {
            state: ComponentState::Inactive,
            context: None,
            removing: false,
            busy: false,
            events: VecDeque::new(),
            interfaces,
            dependencies: Vec::new(),
            next_dependency_id: 1,
            generation: 0,
            last_error: None,
        };
        for dependency in dependencies {
            machine.add_dependency(dependency);
        }
        Self {
            uuid,
            name,
            implementation,
            lifecycle,
            machine: Mutex::new(machine),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Machine<T>> {
        self.machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn implementation(&self) -> &Arc<T> {
        &self.implementation
    }

    pub(crate) fn context(&self) -> Option<BundleContext> {
        self.lock().context.clone()
    }

    // ---- structural changes ----------------------------------------------

    pub(crate) fn add_interface(&self, interface: ProvidedInterface) -> Result<()> {
        let mut machine = self.lock();
        self.ensure_inactive(&machine, "add an interface")?;
        machine.interfaces.push(interface);
        Ok(())
    }

    pub(crate) fn remove_interface(&self, name: &str) -> Result<bool> {
        let mut machine = self.lock();
        self.ensure_inactive(&machine, "remove an interface")?;
        let before = machine.interfaces.len();
        machine.interfaces.retain(|interface| interface.name != name);
        Ok(machine.interfaces.len() != before)
    }

    /// Adds a dependency. Must run on the event loop once the component is
    /// managed.
    pub(crate) fn add_dependency(self: &Arc<Self>, dependency: Dependency<T>) -> Result<DependencyId> {
        let (id, dependency, context) = {
            let mut machine = self.lock();
            self.ensure_uninstantiated(&machine, "add a service dependency")?;
            let id = machine.add_dependency(dependency);
            let dependency = machine.slot_mut(id).map(|slot| Arc::clone(&slot.dependency));
            let context = machine.context.clone();
            if context.is_some() {
                machine.busy = true;
            }
            (id, dependency, context)
        };
        let (Some(context), Some(dependency)) = (context, dependency) else {
            return Ok(id);
        };
        let opened = self.open_tracker(&context, id, &dependency);
        self.lock().busy = false;
        self.pump();
        opened.map(|()| id)
    }

    pub(crate) fn remove_dependency(&self, id: DependencyId) -> Result<()> {
        let (slot, context) = {
            let mut machine = self.lock();
            self.ensure_uninstantiated(&machine, "remove a service dependency")?;
            let position = machine
                .dependencies
                .iter()
                .position(|slot| slot.id == id)
                .ok_or_else(|| {
                    FrameworkError::illegal_argument(format!(
                        "component '{}' has no dependency {id}",
                        self.name
                    ))
                })?;
            (machine.dependencies.remove(position), machine.context.clone())
        };
        let mut slot = slot;
        if let (Some(context), Some(tracker)) = (context, slot.tracker.take()) {
            if let Err(e) = context.stop_tracker(tracker) {
                log::warn!("Component '{}': stopping dependency tracker {tracker}: {e}", self.name);
            }
            self.pump();
        }
        Ok(())
    }

    fn ensure_inactive(&self, machine: &Machine<T>, what: &str) -> Result<()> {
        if machine.state.is_active() || machine.busy {
            return Err(self.refusal(machine, what));
        }
        Ok(())
    }

    /// Dependencies are fixed once `init` has run.
    fn ensure_uninstantiated(&self, machine: &Machine<T>, what: &str) -> Result<()> {
        if machine.state.is_instantiated() || machine.busy {
            return Err(self.refusal(machine, what));
        }
        Ok(())
    }

    fn refusal(&self, machine: &Machine<T>, what: &str) -> FrameworkError {
        FrameworkError::illegal_state(format!(
            "cannot {what} while component '{}' ({}) is {}",
            self.name, self.uuid, machine.state
        ))
    }

    // ---- event intake ----------------------------------------------------

    fn open_tracker(
        self: &Arc<Self>,
        context: &BundleContext,
        id: DependencyId,
        dependency: &Dependency<T>,
    ) -> Result<()> {
        let on_add = Arc::downgrade(self);
        let on_remove = Arc::downgrade(self);
        let options = dependency
            .tracking_options()
            .on_add_tracked(move |service| {
                if let Some(core) = on_add.upgrade() {
                    core.push(DependencyEvent::Added(id, service.clone()));
                }
            })
            .on_remove_tracked(move |service| {
                if let Some(core) = on_remove.upgrade() {
                    core.push(DependencyEvent::Removed(id, service.id()));
                }
            });
        let tracker = context.track_services_with_options(options)?;
        if let Some(slot) = self.lock().slot_mut(id) {
            slot.tracker = Some(tracker);
        }
        Ok(())
    }

    fn push(&self, event: DependencyEvent) {
        self.lock().events.push_back(event);
        self.pump();
    }

    /// Drains queued events and advances the state machine until nothing
    /// changes. Reentrant calls return at once; the outer pump picks up
    /// whatever they queued.
    fn pump(&self) {
        {
            let mut machine = self.lock();
            if machine.busy {
                return;
            }
            machine.busy = true;
        }
        loop {
            loop {
                let event = self.lock().events.pop_front();
                let Some(event) = event else { break };
                self.handle(event);
            }
            let progressed = self.step();
            let mut machine = self.lock();
            if machine.events.is_empty() && !progressed {
                machine.busy = false;
                break;
            }
        }
    }

    fn handle(&self, event: DependencyEvent) {
        let reaction = {
            let mut machine = self.lock();
            let state = machine.state;
            let removing = machine.removing;
            match event {
                DependencyEvent::Added(id, service) => {
                    let Some(slot) = machine.slot_mut(id) else {
                        return;
                    };
                    if slot.tracked.iter().any(|s| s.id() == service.id()) {
                        return;
                    }
                    insert_ranked(&mut slot.tracked, service.clone());
                    if removing || !slot.delivers_in(state) {
                        Reaction::Nothing
                    } else if slot.dependency.strategy == DependencyStrategy::Suspend {
                        Reaction::Rebuild
                    } else {
                        insert_ranked(&mut slot.bound, service.clone());
                        let mut calls = vec![Binding::Add(service)];
                        slot.refresh_highest(&mut calls);
                        Reaction::Deliver(slot.delivery(calls))
                    }
                }
                DependencyEvent::Removed(id, service_id) => {
                    let Some(slot) = machine.slot_mut(id) else {
                        return;
                    };
                    slot.tracked.retain(|s| s.id() != service_id);
                    match slot.bound.iter().position(|s| s.id() == service_id) {
                        None => Reaction::Nothing,
                        Some(_) if slot.dependency.strategy == DependencyStrategy::Suspend && !removing => {
                            Reaction::Rebuild
                        }
                        Some(position) => {
                            let service = slot.bound.remove(position);
                            let mut calls = vec![Binding::Remove(service)];
                            slot.refresh_highest(&mut calls);
                            Reaction::Deliver(slot.delivery(calls))
                        }
                    }
                }
            }
        };
        match reaction {
            Reaction::Nothing => {}
            Reaction::Deliver(delivery) => self.deliver(vec![delivery]),
            Reaction::Rebuild => self.suspend(),
        }
    }

    // ---- transitions -----------------------------------------------------

    /// Performs at most one transition. Returns whether the state changed.
    fn step(&self) -> bool {
        let (state, satisfied) = {
            let machine = self.lock();
            if machine.context.is_none() || machine.removing {
                return false;
            }
            (machine.state, machine.required_satisfied())
        };
        match (state, satisfied) {
            (ComponentState::Inactive, _) => {
                self.set_state(ComponentState::WaitingForRequired);
                true
            }
            (ComponentState::WaitingForRequired, true) => self.instantiate(),
            (ComponentState::InstantiatedAndWaitingForRequired, true) => self.activate(),
            (ComponentState::TrackingOptional, false) => {
                self.deactivate();
                true
            }
            _ => false,
        }
    }

    fn instantiate(&self) -> bool {
        if !self.run_lifecycle("init", self.lifecycle.init.as_ref()) {
            return false;
        }
        let deliveries = {
            let mut machine = self.lock();
            machine.state = ComponentState::InstantiatedAndWaitingForRequired;
            machine
                .dependencies
                .iter_mut()
                .filter(|slot| slot.dependency.required)
                .map(DependencySlot::bind)
                .collect()
        };
        log::debug!("Component '{}' ({}) instantiated", self.name, self.uuid);
        self.deliver(deliveries);
        true
    }

    fn activate(&self) -> bool {
        if !self.run_lifecycle("start", self.lifecycle.start.as_ref()) {
            return false;
        }
        self.register_interfaces();
        let deliveries = {
            let mut machine = self.lock();
            machine.state = ComponentState::TrackingOptional;
            machine
                .dependencies
                .iter_mut()
                .filter(|slot| !slot.dependency.required)
                .map(DependencySlot::bind)
                .collect()
        };
        log::info!("Component '{}' ({}) is active", self.name, self.uuid);
        self.deliver(deliveries);
        true
    }

    /// Active back to instantiated, when a required locking dependency has
    /// lost its last service.
    fn deactivate(&self) {
        self.set_state(ComponentState::InstantiatedAndWaitingForRequired);
        self.unregister_interfaces();
        self.run_lifecycle("stop", self.lifecycle.stop.as_ref());
        let deliveries = {
            let mut machine = self.lock();
            machine
                .dependencies
                .iter_mut()
                .filter(|slot| !slot.dependency.required)
                .map(DependencySlot::unbind)
                .collect()
        };
        self.deliver(deliveries);
        log::info!(
            "Component '{}' ({}) is waiting for a required dependency",
            self.name,
            self.uuid
        );
    }

    /// Full teardown back to waiting; the pump then rebuilds the component
    /// around the current services.
    fn suspend(&self) {
        let state = self.lock().state;
        if state.is_active() {
            // no longer active once the teardown begins
            self.set_state(ComponentState::InstantiatedAndWaitingForRequired);
            self.unregister_interfaces();
            self.run_lifecycle("stop", self.lifecycle.stop.as_ref());
        }
        let deliveries = {
            let mut machine = self.lock();
            machine
                .dependencies
                .iter_mut()
                .map(DependencySlot::unbind)
                .collect()
        };
        self.deliver(deliveries);
        if state.is_instantiated() {
            self.run_lifecycle("deinit", self.lifecycle.deinit.as_ref());
        }
        let generation = {
            let mut machine = self.lock();
            machine.state = ComponentState::WaitingForRequired;
            machine.generation += 1;
            machine.generation
        };
        log::debug!(
            "Component '{}' ({}) suspended for rebuild {generation}",
            self.name,
            self.uuid
        );
    }

    fn set_state(&self, state: ComponentState) {
        self.lock().state = state;
        log::trace!("Component '{}' ({}) -> {state}", self.name, self.uuid);
    }

    fn register_interfaces(&self) {
        let (context, pending) = {
            let machine = self.lock();
            let Some(context) = machine.context.clone() else {
                return;
            };
            let pending: Vec<(usize, RegistrationOptions)> = machine
                .interfaces
                .iter()
                .enumerate()
                .filter(|(_, interface)| interface.registered.is_none())
                .map(|(index, interface)| (index, self.registration_options(interface)))
                .collect();
            (context, pending)
        };
        for (index, options) in pending {
            match context.register_service_with_options(options) {
                Ok(id) => {
                    if let Some(interface) = self.lock().interfaces.get_mut(index) {
                        interface.registered = Some(id);
                    }
                }
                Err(e) => {
                    log::error!(
                        "Component '{}' ({}): registering interface {index} failed: {e}",
                        self.name,
                        self.uuid
                    );
                    self.lock().last_error = Some(e.to_string());
                }
            }
        }
    }

    fn registration_options(&self, interface: &ProvidedInterface) -> RegistrationOptions {
        let mut properties = interface.properties.clone();
        properties.set(COMPONENT_UUID, self.uuid.as_str());
        if let Some(version) = &interface.version {
            properties.set(SERVICE_VERSION, version.clone());
        }
        RegistrationOptions::from_instance(interface.instance.clone(), interface.name.as_str())
            .properties(properties)
    }

    fn unregister_interfaces(&self) {
        let (context, ids) = {
            let mut machine = self.lock();
            let ids: Vec<ServiceId> = machine
                .interfaces
                .iter_mut()
                .filter_map(|interface| interface.registered.take())
                .collect();
            (machine.context.clone(), ids)
        };
        let Some(context) = context else {
            return;
        };
        for id in ids {
            if let Err(e) = context.unregister_service(id) {
                log::warn!("Component '{}': unregistering service {id}: {e}", self.name);
            }
        }
    }

    // ---- user code -------------------------------------------------------

    /// Runs a lifecycle callback; a failure or panic is logged and recorded.
    fn run_lifecycle(&self, phase: &str, callback: Option<&LifecycleFn<T>>) -> bool {
        let Some(callback) = callback else {
            return true;
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(self.implementation.as_ref())))
            .unwrap_or_else(|payload| Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref()))));
        match outcome {
            Ok(()) => true,
            Err(e) => {
                log::error!("Component '{}' ({}): {phase} failed: {e:#}", self.name, self.uuid);
                self.lock().last_error = Some(format!("{phase} failed: {e:#}"));
                false
            }
        }
    }

    fn deliver(&self, deliveries: Vec<Delivery<T>>) {
        let component = self.implementation.as_ref();
        for Delivery { dependency, calls } in deliveries {
            for call in calls {
                let outcome = catch_unwind(AssertUnwindSafe(|| match &call {
                    Binding::Set { previous, current } => {
                        dependency.invoke_set(component, current.as_ref());
                        dependency.invoke_swap(component, previous.as_ref(), current.as_ref());
                    }
                    Binding::Add(service) => dependency.invoke_add(component, service),
                    Binding::Remove(service) => dependency.invoke_remove(component, service),
                }));
                if let Err(payload) = outcome {
                    log::error!(
                        "Component '{}' ({}): callback of dependency on '{}' panicked: {}",
                        self.name,
                        self.uuid,
                        dependency.service_name,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<T: Send + Sync + 'static> ManagedComponent for ComponentCore<T> {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ComponentState {
        self.lock().state
    }

    fn info(&self) -> ComponentInfo {
        let machine = self.lock();
        ComponentInfo {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            state: machine.state,
            active: machine.state.is_active(),
            generation: machine.generation,
            last_error: machine.last_error.clone(),
            interfaces: machine
                .interfaces
                .iter()
                .map(|interface| InterfaceInfo {
                    name: interface.name.clone(),
                    version: interface.version.as_ref().map(ToString::to_string),
                    service_id: interface.registered,
                })
                .collect(),
            dependencies: machine
                .dependencies
                .iter()
                .map(|slot| DependencyInfo {
                    id: slot.id,
                    service_name: slot.dependency.service_name.clone(),
                    version_range: slot.dependency.version_range.as_ref().map(ToString::to_string),
                    filter: slot.dependency.filter_string(),
                    required: slot.dependency.required,
                    strategy: slot.dependency.strategy,
                    available: slot.tracked.len(),
                    bound: slot.bound.len(),
                })
                .collect(),
        }
    }

    fn enable(self: Arc<Self>, context: &BundleContext) -> Result<()> {
        let dependencies: Vec<(DependencyId, Arc<Dependency<T>>)> = {
            let mut machine = self.lock();
            if machine.context.is_some() {
                return Err(FrameworkError::illegal_state(format!(
                    "component '{}' ({}) is already managed",
                    self.name, self.uuid
                )));
            }
            machine.context = Some(context.clone());
            machine.last_error = None;
            // hold the pump while trackers ingest existing services
            machine.busy = true;
            machine
                .dependencies
                .iter()
                .map(|slot| (slot.id, Arc::clone(&slot.dependency)))
                .collect()
        };
        let mut opened = Ok(());
        for (id, dependency) in dependencies {
            if let Err(e) = self.open_tracker(context, id, &dependency) {
                log::error!(
                    "Component '{}' ({}): cannot track '{}': {e}",
                    self.name,
                    self.uuid,
                    dependency.service_name
                );
                opened = Err(e);
            }
        }
        self.lock().busy = false;
        self.pump();
        opened?;

        match self.lock().last_error.clone() {
            Some(error) => Err(FrameworkError::BundleException(format!(
                "component '{}' ({}): {error}",
                self.name, self.uuid
            ))),
            None => Ok(()),
        }
    }

    fn disable(&self) -> Result<()> {
        let (context, trackers) = {
            let mut machine = self.lock();
            let Some(context) = machine.context.clone() else {
                return Ok(());
            };
            if machine.busy {
                return Err(FrameworkError::illegal_state(format!(
                    "component '{}' ({}) cannot be removed from its own callbacks",
                    self.name, self.uuid
                )));
            }
            machine.removing = true;
            machine.busy = true;
            machine.last_error = None;
            let trackers: Vec<TrackerId> = machine
                .dependencies
                .iter_mut()
                .filter_map(|slot| slot.tracker.take())
                .collect();
            (context, trackers)
        };

        for tracker in trackers {
            if let Err(e) = context.stop_tracker(tracker) {
                log::warn!("Component '{}': stopping dependency tracker {tracker}: {e}", self.name);
            }
        }
        loop {
            let event = self.lock().events.pop_front();
            let Some(event) = event else { break };
            self.handle(event);
        }
        let (state, leftovers) = {
            let mut machine = self.lock();
            let leftovers: Vec<Delivery<T>> = machine
                .dependencies
                .iter_mut()
                .filter(|slot| !slot.bound.is_empty() || slot.bound_highest.is_some())
                .map(DependencySlot::unbind)
                .collect();
            let state = machine.state;
            if state.is_active() {
                machine.state = ComponentState::InstantiatedAndWaitingForRequired;
            }
            (state, leftovers)
        };
        self.deliver(leftovers);

        if state.is_active() {
            self.run_lifecycle("stop", self.lifecycle.stop.as_ref());
        }
        if state.is_instantiated() {
            self.run_lifecycle("deinit", self.lifecycle.deinit.as_ref());
        }
        self.unregister_interfaces();

        let mut machine = self.lock();
        machine.state = ComponentState::Inactive;
        machine.context = None;
        machine.removing = false;
        machine.busy = false;
        for slot in &mut machine.dependencies {
            slot.tracked.clear();
        }
        log::debug!("Component '{}' ({}) removed", self.name, self.uuid);
        match machine.last_error.clone() {
            Some(error) => Err(FrameworkError::BundleException(format!(
                "component '{}' ({}): {error}",
                self.name, self.uuid
            ))),
            None => Ok(()),
        }
    }
}
