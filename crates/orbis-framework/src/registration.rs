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

//! Service registrations and the handles consumers hold on them.
//!
//! A [`ServiceRegistration`] is owned by the registry and shared through
//! [`ServiceReference`]s. Consumers that call into a service hold a
//! [`UsagePin`] for the duration of the call; unregistering flips the
//! registration to *removed* (no new pins) and the synchronous path then waits
//! for outstanding pins to drain.

use crate::sync::lock;
use orbis_core::constants::{SERVICE_SCOPE_BUNDLE, SERVICE_SCOPE_SINGLETON};
use orbis_core::{BundleId, Properties, ServiceId, Version};
use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// A type-erased service object.
///
/// Wraps an `Arc<S>` for any `S: ?Sized` (trait objects included) and
/// remembers `S`'s [`TypeId`] so consumers can get the typed `Arc` back.
#[derive(Clone)]
pub struct ServiceInstance {
    object: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl ServiceInstance {
    /// Erases `service`.
    pub fn new<S: ?Sized + Send + Sync + 'static>(service: Arc<S>) -> Self {
        Self {
            object: Arc::new(service),
            type_id: TypeId::of::<S>(),
            type_name: std::any::type_name::<S>(),
        }
    }

    /// Returns the service as `Arc<S>` if it was registered as `S`.
    pub fn downcast<S: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.object.downcast_ref::<Arc<S>>().cloned()
    }

    /// Returns `true` if the service was registered as `S`.
    pub fn is<S: ?Sized + Send + Sync + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<S>()
    }

    /// Name of the registered type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` when both instances share the same object.
    pub fn ptr_eq(&self, other: &ServiceInstance) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Produces one service object per requesting bundle.
///
/// The registry calls [`get_service`](Self::get_service) on a bundle's first
/// use and [`unget_service`](Self::unget_service) exactly once after that
/// bundle's last use ends.
pub trait ServiceFactory: Send + Sync {
    /// Creates the instance for `requester`. `None` means the factory declined.
    fn get_service(&self, requester: BundleId, properties: &Properties) -> Option<ServiceInstance>;

    /// Releases the instance created for `requester`.
    fn unget_service(&self, requester: BundleId, properties: &Properties);
}

pub(crate) enum ServiceSource {
    Instance(ServiceInstance),
    Factory(Arc<dyn ServiceFactory>),
}

impl ServiceSource {
    pub(crate) fn scope(&self) -> &'static str {
        match self {
            ServiceSource::Instance(_) => SERVICE_SCOPE_SINGLETON,
            ServiceSource::Factory(_) => SERVICE_SCOPE_BUNDLE,
        }
    }
}

struct FactoryUse {
    instance: ServiceInstance,
    count: usize,
}

/// A service as stored by the registry.
pub(crate) struct ServiceRegistration {
    pub(crate) id: ServiceId,
    pub(crate) name: String,
    pub(crate) bundle_id: BundleId,
    pub(crate) properties: Properties,
    pub(crate) ranking: i64,
    pub(crate) version: Option<Version>,
    source: ServiceSource,
    removed: AtomicBool,
    usage: Mutex<HashMap<ThreadId, usize>>,
    unused: Condvar,
    factory_uses: Mutex<HashMap<BundleId, FactoryUse>>,
}

impl ServiceRegistration {
    pub(crate) fn new(
        id: ServiceId,
        name: String,
        bundle_id: BundleId,
        properties: Properties,
        ranking: i64,
        version: Option<Version>,
        source: ServiceSource,
    ) -> Self {
        Self {
            id,
            name,
            bundle_id,
            properties,
            ranking,
            version,
            source,
            removed: AtomicBool::new(false),
            usage: Mutex::new(HashMap::new()),
            unused: Condvar::new(),
            factory_uses: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(AtomicOrdering::Acquire)
    }

    /// Stops new pins from being taken. Set under the usage lock so that a
    /// concurrent [`pin`](Self::pin) either sees the flag or is counted.
    pub(crate) fn mark_removed(&self) {
        let _usage = lock(&self.usage);
        self.removed.store(true, AtomicOrdering::Release);
    }

    pub(crate) fn pin(self: &Arc<Self>) -> Option<UsagePin> {
        let mut usage = lock(&self.usage);
        if self.removed.load(AtomicOrdering::Acquire) {
            return None;
        }
        let thread = thread::current().id();
        *usage.entry(thread).or_insert(0) += 1;
        Some(UsagePin {
            registration: Arc::clone(self),
            thread,
        })
    }

    fn unpin(&self, thread: ThreadId) {
        let mut usage = lock(&self.usage);
        if let Some(count) = usage.get_mut(&thread) {
            *count -= 1;
            if *count == 0 {
                usage.remove(&thread);
            }
        }
        self.unused.notify_all();
    }

    /// Number of pins currently held, over all threads.
    pub(crate) fn usage_count(&self) -> usize {
        lock(&self.usage).values().sum()
    }

    /// Waits until no other thread pins this registration.
    ///
    /// Pins held by the calling thread are excluded, otherwise a thread
    /// unregistering a service from inside its own use callback would wait on
    /// itself. Returns `false` on timeout.
    pub(crate) fn wait_until_unused(&self, timeout: Duration) -> bool {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut usage = lock(&self.usage);
        if usage.get(&me).copied().unwrap_or(0) > 0 {
            log::warn!(
                "Service {} ('{}') is unregistered while the calling thread still uses it",
                self.id,
                self.name
            );
        }
        loop {
            let others: usize = usage
                .iter()
                .filter(|(thread, _)| **thread != me)
                .map(|(_, count)| *count)
                .sum();
            if others == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            usage = self
                .unused
                .wait_timeout(usage, deadline - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|p| p.into_inner().0);
        }
    }

    /// Resolves the service object for `requester`, creating it through the
    /// factory on that bundle's first use.
    pub(crate) fn lease(self: &Arc<Self>, requester: BundleId) -> Option<ServiceLease> {
        let instance = match &self.source {
            ServiceSource::Instance(instance) => instance.clone(),
            ServiceSource::Factory(factory) => {
                let mut uses = lock(&self.factory_uses);
                match uses.get_mut(&requester) {
                    Some(entry) => {
                        entry.count += 1;
                        entry.instance.clone()
                    }
                    None => {
                        let instance = factory.get_service(requester, &self.properties)?;
                        log::trace!(
                            "Factory service {} created an instance for bundle {requester}",
                            self.id
                        );
                        uses.insert(
                            requester,
                            FactoryUse {
                                instance: instance.clone(),
                                count: 1,
                            },
                        );
                        instance
                    }
                }
            }
        };
        Some(ServiceLease {
            registration: Arc::clone(self),
            requester,
            instance,
        })
    }

    fn release(&self, requester: BundleId) {
        let ServiceSource::Factory(factory) = &self.source else {
            return;
        };
        let mut uses = lock(&self.factory_uses);
        let Some(entry) = uses.get_mut(&requester) else {
            return;
        };
        entry.count -= 1;
        if entry.count == 0 {
            uses.remove(&requester);
            // still under the lock: a concurrent lease cannot slip between
            // the count reaching zero and the unget
            factory.unget_service(requester, &self.properties);
            log::trace!(
                "Factory service {} released the instance of bundle {requester}",
                self.id
            );
        }
    }

    pub(crate) fn scope(&self) -> &'static str {
        self.source.scope()
    }

    /// Rank order: ranking descending, then id ascending (oldest first).
    pub(crate) fn rank_cmp(&self, other: &ServiceRegistration) -> Ordering {
        other
            .ranking
            .cmp(&self.ranking)
            .then(self.id.cmp(&other.id))
    }
}

/// Marks an in-progress use of a service by the current thread.
pub(crate) struct UsagePin {
    registration: Arc<ServiceRegistration>,
    thread: ThreadId,
}

impl Drop for UsagePin {
    fn drop(&mut self) {
        self.registration.unpin(self.thread);
    }
}

/// A resolved service object for one requesting bundle.
///
/// Dropping the last lease of a bundle on a factory service ungets it.
pub(crate) struct ServiceLease {
    registration: Arc<ServiceRegistration>,
    requester: BundleId,
    instance: ServiceInstance,
}

impl ServiceLease {
    pub(crate) fn instance(&self) -> &ServiceInstance {
        &self.instance
    }
}

impl Drop for ServiceLease {
    fn drop(&mut self) {
        self.registration.release(self.requester);
    }
}

/// A shareable handle on a registered service.
///
/// The handle stays usable for bookkeeping after the service is unregistered;
/// [`is_valid`](Self::is_valid) then returns `false`.
#[derive(Clone)]
pub struct ServiceReference {
    pub(crate) registration: Arc<ServiceRegistration>,
}

impl ServiceReference {
    pub(crate) fn new(registration: Arc<ServiceRegistration>) -> Self {
        Self { registration }
    }

    /// Service id.
    pub fn id(&self) -> ServiceId {
        self.registration.id
    }

    /// Service name (`objectClass`).
    pub fn name(&self) -> &str {
        &self.registration.name
    }

    /// Registration properties, reserved keys included.
    pub fn properties(&self) -> &Properties {
        &self.registration.properties
    }

    /// The bundle that registered the service.
    pub fn bundle_id(&self) -> BundleId {
        self.registration.bundle_id
    }

    /// Service ranking; higher wins.
    pub fn ranking(&self) -> i64 {
        self.registration.ranking
    }

    /// Service version, if one was given.
    pub fn version(&self) -> Option<&Version> {
        self.registration.version.as_ref()
    }

    /// `singleton` or `bundle` (factory services).
    pub fn scope(&self) -> &'static str {
        self.registration.scope()
    }

    /// `false` once the service has been unregistered.
    pub fn is_valid(&self) -> bool {
        !self.registration.is_removed()
    }

    /// Rank order between two references: higher ranking first, then older first.
    pub fn rank_cmp(&self, other: &ServiceReference) -> Ordering {
        self.registration.rank_cmp(&other.registration)
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ServiceReference {}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("ranking", &self.ranking())
            .field("bundle_id", &self.bundle_id())
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    fn registration(id: i64, ranking: i64, source: ServiceSource) -> Arc<ServiceRegistration> {
        Arc::new(ServiceRegistration::new(
            ServiceId::new(id),
            "greeter".into(),
            BundleId::FRAMEWORK,
            Properties::new(),
            ranking,
            None,
            source,
        ))
    }

    #[test]
    fn test_instance_downcasts_trait_objects() {
        let instance = ServiceInstance::new::<dyn Greeter>(Arc::new(English));
        assert!(instance.is::<dyn Greeter>());
        assert_eq!(instance.downcast::<dyn Greeter>().unwrap().greet(), "hello");
        assert!(instance.downcast::<English>().is_none());
    }

    #[test]
    fn test_rank_order() {
        let source = || ServiceSource::Instance(ServiceInstance::new(Arc::new(English)));
        let low_old = registration(1, 0, source());
        let low_new = registration(2, 0, source());
        let high = registration(3, 10, source());
        assert_eq!(high.rank_cmp(&low_old), Ordering::Less);
        assert_eq!(low_old.rank_cmp(&low_new), Ordering::Less);
    }

    #[test]
    fn test_removed_registration_refuses_pins() {
        let reg = registration(1, 0, ServiceSource::Instance(ServiceInstance::new(Arc::new(English))));
        let pin = reg.pin().unwrap();
        assert_eq!(reg.usage_count(), 1);
        reg.mark_removed();
        assert!(reg.pin().is_none());
        drop(pin);
        assert_eq!(reg.usage_count(), 0);
        assert!(reg.wait_until_unused(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_until_unused_ignores_own_pins() {
        let reg = registration(1, 0, ServiceSource::Instance(ServiceInstance::new(Arc::new(English))));
        let _own = reg.pin().unwrap();
        assert!(reg.wait_until_unused(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_until_unused_times_out_on_foreign_pin() {
        let reg = registration(1, 0, ServiceSource::Instance(ServiceInstance::new(Arc::new(English))));
        let (pinned_tx, pinned_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let holder = {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                let _pin = reg.pin().unwrap();
                pinned_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        };
        pinned_rx.recv().unwrap();
        assert!(!reg.wait_until_unused(Duration::from_millis(10)));
        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(reg.wait_until_unused(Duration::from_secs(5)));
    }

    struct CountingFactory {
        gets: AtomicUsize,
        ungets: AtomicUsize,
    }

    impl ServiceFactory for CountingFactory {
        fn get_service(&self, requester: BundleId, _: &Properties) -> Option<ServiceInstance> {
            self.gets.fetch_add(1, AtomicOrdering::SeqCst);
            Some(ServiceInstance::new(Arc::new(requester.value())))
        }

        fn unget_service(&self, _: BundleId, _: &Properties) {
            self.ungets.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    #[test]
    fn test_factory_instances_are_per_bundle_and_ungot_once() {
        let factory = Arc::new(CountingFactory {
            gets: AtomicUsize::new(0),
            ungets: AtomicUsize::new(0),
        });
        let reg = registration(1, 0, ServiceSource::Factory(factory.clone()));
        assert_eq!(reg.scope(), SERVICE_SCOPE_BUNDLE);

        let a1 = reg.lease(BundleId::new(1)).unwrap();
        let a2 = reg.lease(BundleId::new(1)).unwrap();
        let b = reg.lease(BundleId::new(2)).unwrap();
        assert!(a1.instance().ptr_eq(a2.instance()));
        assert_eq!(*b.instance().downcast::<i64>().unwrap(), 2);
        assert_eq!(factory.gets.load(AtomicOrdering::SeqCst), 2);

        drop(a1);
        assert_eq!(factory.ungets.load(AtomicOrdering::SeqCst), 0);
        drop(a2);
        assert_eq!(factory.ungets.load(AtomicOrdering::SeqCst), 1);
        drop(b);
        assert_eq!(factory.ungets.load(AtomicOrdering::SeqCst), 2);
    }
}
