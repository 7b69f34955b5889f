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

use orbis_framework::{BundleActivator, BundleContext, BundleState, Framework};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Provider {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl BundleActivator for Provider {
    fn start(&mut self, context: &BundleContext) -> anyhow::Result<()> {
        context.register_service(Arc::new(self.name.to_string()), "provider", None)?;
        self.log.lock().unwrap().push(format!("start {}", self.name));
        Ok(())
    }

    fn stop(&mut self, _context: &BundleContext) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("stop {}", self.name));
        Ok(())
    }
}

struct Consumer {
    seen: Arc<AtomicUsize>,
}

impl BundleActivator for Consumer {
    fn start(&mut self, context: &BundleContext) -> anyhow::Result<()> {
        let seen = self.seen.clone();
        // left open on purpose: the framework closes it when the bundle stops
        context.track_services::<String>(
            "provider",
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        )?;
        Ok(())
    }
}

#[test]
fn test_bundles_stop_in_reverse_install_order() {
    let framework = Framework::with_defaults().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let first = framework
        .install_bundle("first", Box::new(Provider { name: "first", log: log.clone() }))
        .unwrap();
    let second = framework
        .install_bundle("second", Box::new(Provider { name: "second", log: log.clone() }))
        .unwrap();
    framework.start_bundle(first).unwrap();
    framework.start_bundle(second).unwrap();
    assert_eq!(framework.context().find_services("provider").len(), 2);

    framework.stop().unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["start first", "start second", "stop second", "stop first"]
    );
}

#[test]
fn test_stopping_a_bundle_closes_its_trackers() {
    let framework = Framework::with_defaults().unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let consumer = framework
        .install_bundle("consumer", Box::new(Consumer { seen: seen.clone() }))
        .unwrap();
    framework.start_bundle(consumer).unwrap();
    assert_eq!(framework.registry().trackers_of_bundle(consumer).len(), 1);

    let ctx = framework.context();
    ctx.register_service(Arc::new("a".to_string()), "provider", None).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    framework.stop_bundle(consumer).unwrap();
    assert_eq!(framework.bundle_state(consumer), BundleState::Resolved);
    assert!(framework.registry().trackers_of_bundle(consumer).is_empty());

    ctx.register_service(Arc::new("b".to_string()), "provider", None).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    framework.stop().unwrap();
}

#[test]
fn test_framework_bundle_cannot_be_stopped_directly() {
    let framework = Framework::with_defaults().unwrap();
    let err = framework
        .stop_bundle(orbis_framework::orbis_core::BundleId::FRAMEWORK)
        .unwrap_err();
    assert_eq!(err.status(), orbis_framework::orbis_core::Status::IllegalArgument);
    framework.stop().unwrap();
}
