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

//! The framework instance.
//!
//! A [`Framework`] is an explicit context object: it owns the event loop, the
//! service registry and the installed bundles. Several frameworks can live in
//! one process; nothing here is global.

use crate::bundle::{BundleActivator, BundleEntry, BundleState, StopHook};
use crate::config::FrameworkConfig;
use crate::context::BundleContext;
use crate::event_loop::{Completion, EventLoop};
use crate::registry::ServiceRegistry;
use crate::sync::{call_guarded, lock, panic_message};
use orbis_core::constants::FRAMEWORK_UUID;
use orbis_core::{BundleId, FrameworkError, Properties, PropertyValue, Result};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

const FRAMEWORK_BUNDLE_NAME: &str = "orbis.framework";

struct FrameworkInner {
    uuid: String,
    config: FrameworkConfig,
    properties: Properties,
    event_loop: EventLoop,
    registry: Arc<ServiceRegistry>,
    bundles: Mutex<BTreeMap<BundleId, BundleEntry>>,
    next_bundle_id: AtomicI64,
    stopped: AtomicBool,
}

/// Stops the framework when the last owning handle goes away.
struct ShutdownGuard {
    inner: Weak<FrameworkInner>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let framework = Framework { inner, owner: None };
        if framework.is_stopped() {
            return;
        }
        if framework.is_event_loop_thread() {
            log::error!(
                "Last handle on framework {} dropped on its event loop; it keeps running",
                framework.uuid()
            );
            return;
        }
        log::debug!("Last handle on framework {} dropped; stopping it", framework.uuid());
        if let Err(e) = framework.stop() {
            log::error!("Stopping framework {} on drop: {e}", framework.uuid());
        }
    }
}

/// Handle on a running framework. Cloning is cheap and shares the instance.
///
/// The handle returned by [`Framework::new`] and its clones own the
/// framework: once the last of them is dropped the framework is stopped as
/// if by [`stop`](Self::stop). Bundle contexts, and the handle they hand out
/// through [`BundleContext::framework`], do not keep it running. Call
/// [`stop`](Self::stop) explicitly to see its errors.
#[derive(Clone)]
pub struct Framework {
    inner: Arc<FrameworkInner>,
    owner: Option<Arc<ShutdownGuard>>,
}

impl Framework {
    /// Starts a framework: spawns its event loop and activates bundle 0.
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        let uuid = config
            .uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut properties = config.properties.clone();
        properties.set(FRAMEWORK_UUID, uuid.as_str());

        let event_loop = EventLoop::start(config.event_queue_warning_threshold)?;
        let mut framework_bundle =
            BundleEntry::new(BundleId::FRAMEWORK, FRAMEWORK_BUNDLE_NAME.to_string(), None);
        framework_bundle.state = BundleState::Active;

        let mut framework = Self {
            owner: None,
            inner: Arc::new(FrameworkInner {
                uuid,
                config,
                properties,
                event_loop,
                registry: Arc::new(ServiceRegistry::new()),
                bundles: Mutex::new(BTreeMap::from([(BundleId::FRAMEWORK, framework_bundle)])),
                next_bundle_id: AtomicI64::new(1),
                stopped: AtomicBool::new(false),
            }),
        };
        framework.owner = Some(Arc::new(ShutdownGuard {
            inner: Arc::downgrade(&framework.inner),
        }));
        log::info!("Framework {} started.", framework.inner.uuid);
        Ok(framework)
    }

    /// Starts a framework with [`FrameworkConfig::default`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(FrameworkConfig::default())
    }

    /// The framework uuid.
    pub fn uuid(&self) -> &str {
        &self.inner.uuid
    }

    /// The configuration the framework was started with.
    pub fn config(&self) -> &FrameworkConfig {
        &self.inner.config
    }

    /// A framework property, `framework.uuid` included.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.inner.properties.get(key)
    }

    /// All framework properties.
    pub fn properties(&self) -> &Properties {
        &self.inner.properties
    }

    /// The service registry.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    pub(crate) fn registry_arc(&self) -> Arc<ServiceRegistry> {
        Arc::clone(&self.inner.registry)
    }

    pub(crate) fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// A handle that does not keep the framework running. Everything the
    /// framework hands out or captures in its own tasks uses one, so that
    /// bundles holding their context do not keep the owners from stopping it.
    pub(crate) fn detached(&self) -> Framework {
        Framework {
            inner: Arc::clone(&self.inner),
            owner: None,
        }
    }

    /// Context of the framework bundle (id 0).
    pub fn context(&self) -> BundleContext {
        BundleContext::new(self.detached(), BundleId::FRAMEWORK)
    }

    /// Context of an installed bundle.
    pub fn bundle_context(&self, id: BundleId) -> Option<BundleContext> {
        lock(&self.inner.bundles)
            .contains_key(&id)
            .then(|| BundleContext::new(self.detached(), id))
    }

    /// Returns `true` on the event loop thread.
    pub fn is_event_loop_thread(&self) -> bool {
        self.inner.event_loop.is_event_loop_thread()
    }

    /// Installs a bundle. It stays `Installed` until started.
    pub fn install_bundle(
        &self,
        symbolic_name: &str,
        activator: Box<dyn BundleActivator>,
    ) -> Result<BundleId> {
        if symbolic_name.trim().is_empty() {
            return Err(FrameworkError::illegal_argument("bundle symbolic name must not be empty"));
        }
        self.ensure_running()?;
        let mut bundles = lock(&self.inner.bundles);
        if bundles.values().any(|b| b.symbolic_name == symbolic_name) {
            return Err(FrameworkError::illegal_state(format!(
                "bundle '{symbolic_name}' is already installed"
            )));
        }
        let id = BundleId::new(self.inner.next_bundle_id.fetch_add(1, Ordering::SeqCst));
        bundles.insert(
            id,
            BundleEntry::new(id, symbolic_name.to_string(), Some(activator)),
        );
        log::info!("Installed bundle {id} '{symbolic_name}'");
        Ok(id)
    }

    /// Starts a bundle on the event loop. Starting an active bundle is a no-op.
    pub fn start_bundle(&self, id: BundleId) -> Result<()> {
        let framework = self.detached();
        self.inner
            .event_loop
            .execute(&format!("start bundle {id}"), move || framework.start_bundle_on_loop(id))?
    }

    /// Stops a bundle on the event loop. Stopping an inactive bundle is a no-op.
    pub fn stop_bundle(&self, id: BundleId) -> Result<()> {
        if id == BundleId::FRAMEWORK {
            return Err(FrameworkError::illegal_argument(
                "the framework bundle is stopped with Framework::stop",
            ));
        }
        let framework = self.detached();
        self.inner
            .event_loop
            .execute(&format!("stop bundle {id}"), move || framework.stop_bundle_on_loop(id))?
    }

    /// Stops (if needed) and removes a bundle.
    pub fn uninstall_bundle(&self, id: BundleId) -> Result<()> {
        self.stop_bundle(id)?;
        let entry = lock(&self.inner.bundles).remove(&id);
        match entry {
            Some(entry) => {
                log::info!("Uninstalled bundle {id} '{}'", entry.symbolic_name);
                Ok(())
            }
            None => Err(FrameworkError::illegal_argument(format!("no bundle with id {id}"))),
        }
    }

    /// State of a bundle; `Uninstalled` for an unknown id.
    pub fn bundle_state(&self, id: BundleId) -> BundleState {
        lock(&self.inner.bundles)
            .get(&id)
            .map_or(BundleState::Uninstalled, |b| b.state)
    }

    /// Symbolic name of a bundle.
    pub fn bundle_name(&self, id: BundleId) -> Option<String> {
        lock(&self.inner.bundles)
            .get(&id)
            .map(|b| b.symbolic_name.clone())
    }

    /// Ids of the installed bundles, framework bundle included.
    pub fn bundle_ids(&self) -> Vec<BundleId> {
        lock(&self.inner.bundles).keys().copied().collect()
    }

    /// Runs `task` on the event loop and waits for its result.
    pub fn execute_on_event_loop<R, F>(&self, name: &str, task: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.inner.event_loop.execute(name, task)
    }

    /// Queues `task` on the event loop. The returned completion can be waited
    /// on, or cancelled while the task is still queued.
    pub fn submit_generic_event(
        &self,
        name: &str,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<Completion> {
        self.inner.event_loop.submit(name, task)
    }

    /// Blocks until the event queue is empty.
    pub fn wait_for_empty_event_queue(&self) {
        self.inner.event_loop.wait_for_empty_queue();
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Stops every bundle in reverse install order, cleans up what the
    /// framework bundle left behind and shuts the event loop down.
    ///
    /// Events queued before the call still run; later submissions fail with
    /// `IllegalState`.
    pub fn stop(&self) -> Result<()> {
        if self.is_event_loop_thread() {
            return Err(FrameworkError::illegal_state(
                "the framework cannot be stopped from its event loop",
            ));
        }
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let bundle_ids: Vec<BundleId> = self
            .bundle_ids()
            .into_iter()
            .filter(|id| *id != BundleId::FRAMEWORK)
            .rev()
            .collect();
        for id in bundle_ids {
            if let Err(e) = self.stop_bundle(id) {
                log::warn!("Error while stopping bundle {id}: {e}");
            }
        }
        let framework = self.detached();
        self.inner.event_loop.execute("stop framework bundle", move || {
            framework.run_stop_hooks(BundleId::FRAMEWORK);
            framework.cleanup_bundle(BundleId::FRAMEWORK);
        })?;
        self.inner.event_loop.wait_for_empty_queue();

        // dropping the activators breaks any context they still hold
        let bundles = std::mem::take(&mut *lock(&self.inner.bundles));
        drop(bundles);
        self.inner.event_loop.shutdown()?;
        log::info!("Framework {} stopped.", self.inner.uuid);
        Ok(())
    }

    pub(crate) fn add_stop_hook(&self, id: BundleId, hook: StopHook) -> Result<()> {
        let mut bundles = lock(&self.inner.bundles);
        let entry = bundles
            .get_mut(&id)
            .ok_or_else(|| FrameworkError::illegal_argument(format!("no bundle with id {id}")))?;
        entry.stop_hooks.push(hook);
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            Err(FrameworkError::illegal_state("the framework is stopped"))
        } else {
            Ok(())
        }
    }

    fn start_bundle_on_loop(&self, id: BundleId) -> Result<()> {
        let (mut activator, name) = {
            let mut bundles = lock(&self.inner.bundles);
            let entry = bundles
                .get_mut(&id)
                .ok_or_else(|| FrameworkError::illegal_argument(format!("no bundle with id {id}")))?;
            match entry.state {
                BundleState::Active => return Ok(()),
                BundleState::Installed | BundleState::Resolved => {}
                other => {
                    return Err(FrameworkError::illegal_state(format!(
                        "bundle {id} cannot start while {other}"
                    )))
                }
            }
            entry.state = BundleState::Starting;
            (entry.activator.take(), entry.symbolic_name.clone())
        };

        let context = BundleContext::new(self.detached(), id);
        let result = match activator.as_mut() {
            Some(activator) => run_activator(|| activator.start(&context)),
            None => Ok(()),
        };
        let started = result.is_ok();
        self.finish_transition(id, activator, if started { BundleState::Active } else { BundleState::Resolved });

        match result {
            Ok(()) => {
                log::info!("Started bundle {id} '{name}'");
                Ok(())
            }
            Err(e) => {
                log::error!("Bundle {id} '{name}' failed to start: {e:#}");
                self.run_stop_hooks(id);
                self.cleanup_bundle(id);
                Err(FrameworkError::bundle_exception(format!("starting bundle {id} '{name}'"), &e))
            }
        }
    }

    fn stop_bundle_on_loop(&self, id: BundleId) -> Result<()> {
        let (mut activator, name) = {
            let mut bundles = lock(&self.inner.bundles);
            let entry = bundles
                .get_mut(&id)
                .ok_or_else(|| FrameworkError::illegal_argument(format!("no bundle with id {id}")))?;
            match entry.state {
                BundleState::Active => {}
                BundleState::Installed | BundleState::Resolved => return Ok(()),
                other => {
                    return Err(FrameworkError::illegal_state(format!(
                        "bundle {id} cannot stop while {other}"
                    )))
                }
            }
            entry.state = BundleState::Stopping;
            (entry.activator.take(), entry.symbolic_name.clone())
        };

        let context = BundleContext::new(self.detached(), id);
        let result = match activator.as_mut() {
            Some(activator) => run_activator(|| activator.stop(&context)),
            None => Ok(()),
        };
        self.run_stop_hooks(id);
        self.cleanup_bundle(id);
        self.finish_transition(id, activator, BundleState::Resolved);

        match result {
            Ok(()) => {
                log::info!("Stopped bundle {id} '{name}'");
                Ok(())
            }
            Err(e) => {
                log::error!("Bundle {id} '{name}' failed to stop cleanly: {e:#}");
                Err(FrameworkError::bundle_exception(format!("stopping bundle {id} '{name}'"), &e))
            }
        }
    }

    fn finish_transition(
        &self,
        id: BundleId,
        activator: Option<Box<dyn BundleActivator>>,
        state: BundleState,
    ) {
        if let Some(entry) = lock(&self.inner.bundles).get_mut(&id) {
            entry.activator = activator;
            entry.state = state;
        }
    }

    fn run_stop_hooks(&self, id: BundleId) {
        let hooks = lock(&self.inner.bundles)
            .get_mut(&id)
            .map(|entry| std::mem::take(&mut entry.stop_hooks))
            .unwrap_or_default();
        for hook in hooks {
            call_guarded(&format!("stop hook of bundle {id}"), hook);
        }
    }

    /// Force-stops the trackers and unregisters the services a bundle left behind.
    fn cleanup_bundle(&self, id: BundleId) {
        let registry = &self.inner.registry;
        for tracker in registry.trackers_of_bundle(id) {
            log::warn!("Bundle {id} left tracker {tracker} open; stopping it");
            if !registry.apply_close_tracker(tracker) {
                registry.apply_close_meta_tracker(tracker);
            }
        }
        for service in registry.services_of_bundle(id) {
            log::warn!("Bundle {id} left service {service} registered; unregistering it");
            registry.apply_unregister(service);
        }
    }
}

fn run_activator(call: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<()> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "activator panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("uuid", &self.inner.uuid)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
