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

use orbis_core::Status;
use orbis_dm::{Component, ComponentState, DependencyManager, DependencyStrategy, ServiceDependency};
use orbis_framework::{BundleActivator, BundleContext, Framework};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.lock().unwrap())
    }
}

fn named_component(name: &'static str, journal: Arc<Journal>) -> Component<Journal> {
    Component::with_shared(name, journal)
        .on_start(move |j: &Journal| {
            j.record(format!("start {name}"));
            Ok(())
        })
        .on_stop(move |j: &Journal| {
            j.record(format!("stop {name}"));
            Ok(())
        })
        .on_deinit(move |j: &Journal| {
            j.record(format!("deinit {name}"));
            Ok(())
        })
}

fn required(name: &str) -> ServiceDependency<Journal, String> {
    ServiceDependency::<Journal, String>::new()
        .set_service(name, None, None)
        .unwrap()
        .set_required(true)
}

#[test]
fn test_remove_tears_down_in_order() {
    let framework = Framework::with_defaults().unwrap();
    let ctx = framework.context();
    let manager = DependencyManager::new(ctx.clone()).unwrap();
    let journal = Arc::new(Journal::default());

    ctx.register_service(Arc::new("a".to_string()), "log", None).unwrap();
    let watcher = journal.clone();
    ctx.track_services::<String>("greeting", |_| {}, move |_| watcher.record("greeting gone"))
        .unwrap();

    let handle = manager
        .add(
            named_component("greeter", journal.clone())
                .add_interface(Arc::new("hi".to_string()), "greeting")
                .add_service_dependency(
                    required("log")
                        .set_strategy(DependencyStrategy::Locking)
                        .on_set(|j, s| j.record(format!("set {}", s.is_some())))
                        .on_remove(|j, s| j.record(format!("remove {s}"))),
                ),
        )
        .unwrap();
    assert!(ctx.find_service("greeting").is_some());
    journal.take();

    manager.remove(handle.uuid()).unwrap();
    assert_eq!(
        journal.take(),
        vec!["remove a", "set false", "stop greeter", "deinit greeter", "greeting gone"]
    );
    assert_eq!(handle.state(), ComponentState::Inactive);
    assert_eq!(manager.component_count(), 0);
    assert_eq!(ctx.find_service("greeting"), None);

    let err = manager.remove(handle.uuid()).unwrap_err();
    assert_eq!(err.status(), Status::IllegalArgument);
    assert_eq!(manager.remove_async("nope").unwrap_err().status(), Status::IllegalArgument);
    framework.stop().unwrap();
}

#[test]
fn test_remove_all_goes_newest_first() {
    let framework = Framework::with_defaults().unwrap();
    let manager = DependencyManager::new(framework.context()).unwrap();
    let journal = Arc::new(Journal::default());

    assert!(manager.are_components_active());
    assert!(!manager.is_any_component_active());

    manager.add(named_component("first", journal.clone())).unwrap();
    manager.add(named_component("second", journal.clone())).unwrap();
    let waiting = manager
        .add(named_component("third", journal.clone()).add_service_dependency(required("absent")))
        .unwrap();
    assert_eq!(waiting.state(), ComponentState::WaitingForRequired);
    assert!(!manager.are_components_active());
    assert!(manager.is_any_component_active());
    assert_eq!(
        manager.info().components[2].missing_required(),
        vec!["absent"]
    );
    journal.take();

    manager.remove_all_components().unwrap();
    assert_eq!(
        journal.take(),
        vec!["stop second", "deinit second", "stop first", "deinit first"]
    );
    assert_eq!(manager.component_count(), 0);
    framework.stop().unwrap();
}

#[test]
fn test_structure_is_fixed_while_running() {
    let framework = Framework::with_defaults().unwrap();
    let ctx = framework.context();
    let manager = DependencyManager::new(ctx.clone()).unwrap();
    let journal = Arc::new(Journal::default());

    let handle = manager
        .add(named_component("editable", journal.clone()).add_service_dependency(required("log")))
        .unwrap();
    handle.add_interface(Arc::new(3_u32), "counter").unwrap();
    let db = handle.add_service_dependency(required("db")).unwrap();
    assert_eq!(handle.info().dependencies.len(), 2);

    ctx.register_service(Arc::new("stdout".to_string()), "log", None).unwrap();
    assert_eq!(handle.state(), ComponentState::WaitingForRequired);

    handle.remove_service_dependency(db).unwrap();
    assert!(handle.is_active());
    assert!(ctx.find_service("counter").is_some());

    let err = handle.add_interface(Arc::new(4_u32), "other").unwrap_err();
    assert_eq!(err.status(), Status::IllegalState);
    assert_eq!(handle.remove_interface("counter").unwrap_err().status(), Status::IllegalState);
    let err = handle.add_service_dependency(required("db")).unwrap_err();
    assert_eq!(err.status(), Status::IllegalState);
    framework.stop().unwrap();
}

#[test]
fn test_async_add_and_remove() {
    let framework = Framework::with_defaults().unwrap();
    let manager = DependencyManager::new(framework.context()).unwrap();
    let journal = Arc::new(Journal::default());

    let handle = manager.add_async(named_component("later", journal.clone())).unwrap();
    framework.wait_for_empty_event_queue();
    assert!(handle.is_active());
    assert_eq!(manager.component_state(handle.uuid()), Some(ComponentState::TrackingOptional));

    manager.remove_async(handle.uuid()).unwrap();
    framework.wait_for_empty_event_queue();
    assert!(manager.component(handle.uuid()).is_none());
    assert_eq!(journal.take(), vec!["start later", "stop later", "deinit later"]);
    framework.stop().unwrap();
}

#[test]
fn test_info_serializes_to_json() {
    let framework = Framework::with_defaults().unwrap();
    let manager = DependencyManager::new(framework.context()).unwrap();
    manager
        .add(
            Component::new("reporter", ())
                .add_interface_with_properties(
                    Arc::new(1_u8),
                    "report",
                    Some("1.2"),
                    orbis_core::Properties::new(),
                ),
        )
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&manager.info().to_json()).unwrap();
    let component = &json["components"][0];
    assert_eq!(component["name"], "reporter");
    assert_eq!(component["state"], "TRACKING_OPTIONAL");
    assert_eq!(component["interfaces"][0]["version"], "1.2.0");
    framework.stop().unwrap();
}

struct App {
    journal: Arc<Journal>,
    manager: Option<DependencyManager>,
}

impl BundleActivator for App {
    fn start(&mut self, context: &BundleContext) -> anyhow::Result<()> {
        let manager = DependencyManager::new(context.clone())?;
        manager.add(
            named_component("bundled", self.journal.clone())
                .add_interface(Arc::new("v".to_string()), "bundled.service"),
        )?;
        self.manager = Some(manager);
        Ok(())
    }

    fn stop(&mut self, _context: &BundleContext) -> anyhow::Result<()> {
        let count = self.manager.as_ref().map_or(0, DependencyManager::component_count);
        self.journal.record(format!("activator stop with {count}"));
        Ok(())
    }
}

#[test]
fn test_bundle_stop_removes_its_components() {
    let framework = Framework::with_defaults().unwrap();
    let journal = Arc::new(Journal::default());
    let id = framework
        .install_bundle(
            "app",
            Box::new(App {
                journal: journal.clone(),
                manager: None,
            }),
        )
        .unwrap();
    framework.start_bundle(id).unwrap();
    let ctx = framework.context();
    assert!(ctx.find_service("bundled.service").is_some());
    assert_eq!(journal.take(), vec!["start bundled"]);

    framework.stop_bundle(id).unwrap();
    assert_eq!(journal.take(), vec!["activator stop with 1", "stop bundled", "deinit bundled"]);
    assert_eq!(ctx.find_service("bundled.service"), None);
    framework.stop().unwrap();
}

#[derive(Default)]
struct SelfRemover {
    target: Mutex<Option<(DependencyManager, String)>>,
    outcome: Mutex<Option<Status>>,
}

#[test]
fn test_removal_from_own_start_is_refused_and_kept() {
    let framework = Framework::with_defaults().unwrap();
    let manager = DependencyManager::new(framework.context()).unwrap();
    let remover = Arc::new(SelfRemover::default());

    let component = Component::with_shared("self-remover", remover.clone()).on_start(|r: &SelfRemover| {
        let target = r.target.lock().unwrap().clone();
        if let Some((manager, uuid)) = target {
            let status = manager.remove(&uuid).err().map(|e| e.status());
            *r.outcome.lock().unwrap() = status;
        }
        Ok(())
    });
    *remover.target.lock().unwrap() = Some((manager.clone(), component.uuid().to_string()));
    let handle = manager.add(component).unwrap();

    assert_eq!(*remover.outcome.lock().unwrap(), Some(Status::IllegalState));
    assert_eq!(manager.component_count(), 1);
    assert!(handle.is_active());
    assert!(manager.are_components_active());

    remover.target.lock().unwrap().take();
    manager.remove(handle.uuid()).unwrap();
    assert_eq!(manager.component_count(), 0);
    assert_eq!(handle.state(), ComponentState::Inactive);
    framework.stop().unwrap();
}

#[test]
fn test_remove_all_from_own_stop_keeps_the_refused_component() {
    let framework = Framework::with_defaults().unwrap();
    let ctx = framework.context();
    let manager = DependencyManager::new(ctx.clone()).unwrap();
    let journal = Arc::new(Journal::default());
    let remover = Arc::new(SelfRemover::default());

    let first = manager.add(named_component("first", journal.clone())).unwrap();
    let clearing = Component::with_shared("clearing", remover.clone())
        .on_stop(|r: &SelfRemover| {
            let target = r.target.lock().unwrap().take();
            if let Some((manager, _)) = target {
                let status = manager.remove_all_components().err().map(|e| e.status());
                *r.outcome.lock().unwrap() = status;
            }
            Ok(())
        })
        .add_service_dependency(
            ServiceDependency::<SelfRemover, String>::new()
                .set_service("log", None, None)
                .unwrap()
                .set_required(true),
        );
    *remover.target.lock().unwrap() = Some((manager.clone(), clearing.uuid().to_string()));
    let log = ctx.register_service(Arc::new("stdout".to_string()), "log", None).unwrap();
    let clearing = manager.add(clearing).unwrap();
    assert!(clearing.is_active());

    // losing the service runs `stop`, which clears the manager
    ctx.unregister_service(log).unwrap();
    assert_eq!(*remover.outcome.lock().unwrap(), Some(Status::IllegalState));
    assert_eq!(first.state(), ComponentState::Inactive);
    assert_eq!(journal.take(), vec!["start first", "stop first", "deinit first"]);
    assert_eq!(manager.component_count(), 1);
    assert!(manager.component(clearing.uuid()).is_some());
    framework.stop().unwrap();
}
