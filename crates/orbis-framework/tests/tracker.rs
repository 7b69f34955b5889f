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

use orbis_framework::orbis_core::constants::SERVICE_RANKING;
use orbis_framework::orbis_core::{Properties, ServiceId};
use orbis_framework::{Framework, MetaTrackerOptions, ServiceTrackingOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn ranked(ranking: i64) -> Option<Properties> {
    Some(Properties::new().with(SERVICE_RANKING, ranking))
}

#[test]
fn test_set_falls_back_to_the_oldest_of_equal_rank() {
    let framework = Framework::with_defaults().unwrap();
    let ctx = framework.context();

    let current: Arc<Mutex<Option<ServiceId>>> = Arc::new(Mutex::new(None));
    let tracker = ctx
        .track_services_with_options(ServiceTrackingOptions::<u32>::new("svc").on_set_tracked({
            let current = current.clone();
            move |service| *current.lock().unwrap() = service.map(|s| s.id())
        }))
        .unwrap();

    let first = ctx.register_service(Arc::new(1_u32), "svc", ranked(0)).unwrap();
    let _second = ctx.register_service(Arc::new(2_u32), "svc", ranked(0)).unwrap();
    let best = ctx.register_service(Arc::new(3_u32), "svc", ranked(10)).unwrap();
    assert_eq!(*current.lock().unwrap(), Some(best));

    ctx.unregister_service(best).unwrap();
    assert_eq!(*current.lock().unwrap(), Some(first));

    ctx.stop_tracker(tracker).unwrap();
    assert_eq!(*current.lock().unwrap(), None);
    framework.stop().unwrap();
}

#[test]
fn test_no_callbacks_after_stop_tracker() {
    let framework = Framework::with_defaults().unwrap();
    let ctx = framework.context();
    let adds = Arc::new(AtomicUsize::new(0));
    let removes = Arc::new(AtomicUsize::new(0));
    let tracker = ctx
        .track_services::<u8>(
            "quiet",
            {
                let adds = adds.clone();
                move |_| {
                    adds.fetch_add(1, Ordering::SeqCst);
                }
            },
            {
                let removes = removes.clone();
                move |_| {
                    removes.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .unwrap();

    let id = ctx.register_service(Arc::new(1_u8), "quiet", None).unwrap();
    assert_eq!(adds.load(Ordering::SeqCst), 1);

    ctx.stop_tracker(tracker).unwrap();
    assert_eq!(removes.load(Ordering::SeqCst), 1);
    ctx.stop_tracker(tracker).unwrap();

    ctx.register_service(Arc::new(2_u8), "quiet", None).unwrap();
    ctx.unregister_service(id).unwrap();
    assert_eq!(adds.load(Ordering::SeqCst), 1);
    assert_eq!(removes.load(Ordering::SeqCst), 1);
    framework.stop().unwrap();
}

#[test]
fn test_tracker_sees_existing_services_in_registration_order() {
    let framework = Framework::with_defaults().unwrap();
    let ctx = framework.context();
    for value in [1_u32, 2, 3] {
        ctx.register_service(Arc::new(value), "pre", None).unwrap();
    }
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sets = Arc::new(AtomicUsize::new(0));
    let created = Arc::new(AtomicUsize::new(0));
    let tracker = ctx
        .track_services_with_options(
            ServiceTrackingOptions::<u32>::new("pre")
                .on_add({
                    let seen = seen.clone();
                    move |v| seen.lock().unwrap().push(*v)
                })
                .on_set({
                    let sets = sets.clone();
                    move |_| {
                        sets.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .on_created({
                    let created = created.clone();
                    move || {
                        created.fetch_add(1, Ordering::SeqCst);
                    }
                }),
        )
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(sets.load(Ordering::SeqCst), 1);
    assert_eq!(created.load(Ordering::SeqCst), 1);
    ctx.stop_tracker(tracker).unwrap();
    framework.stop().unwrap();
}

#[test]
fn test_meta_tracker_reports_trackers() {
    let framework = Framework::with_defaults().unwrap();
    let ctx = framework.context();
    let early = ctx.track_service::<u8>("watched", |_| {}).unwrap();

    let added = Arc::new(Mutex::new(Vec::new()));
    let removed = Arc::new(Mutex::new(Vec::new()));
    let meta = ctx
        .track_service_trackers(
            MetaTrackerOptions::new("watched")
                .on_tracker_added({
                    let added = added.clone();
                    move |info| added.lock().unwrap().push(info.tracker_id)
                })
                .on_tracker_removed({
                    let removed = removed.clone();
                    move |info| removed.lock().unwrap().push(info.tracker_id)
                }),
        )
        .unwrap();
    let late = ctx.track_service::<u8>("watched", |_| {}).unwrap();
    ctx.track_service::<u8>("other", |_| {}).unwrap();
    ctx.stop_tracker(early).unwrap();

    assert_eq!(*added.lock().unwrap(), vec![early, late]);
    assert_eq!(*removed.lock().unwrap(), vec![early]);

    ctx.stop_tracker(meta).unwrap();
    ctx.stop_tracker(late).unwrap();
    assert_eq!(*removed.lock().unwrap(), vec![early]);
    framework.stop().unwrap();
}

#[test]
fn test_async_tracker_can_be_cancelled_before_it_opens() {
    let framework = Framework::with_defaults().unwrap();
    let ctx = framework.context();
    ctx.register_service(Arc::new(1_u8), "gated", None).unwrap();

    let (open_gate, gate) = crossbeam_channel::bounded::<()>(0);
    framework
        .submit_generic_event("gate", move || {
            let _ = gate.recv();
        })
        .unwrap();

    let adds = Arc::new(AtomicUsize::new(0));
    let tracker = ctx
        .track_services_with_options_async(ServiceTrackingOptions::<u8>::new("gated").on_add({
            let adds = adds.clone();
            move |_| {
                adds.fetch_add(1, Ordering::SeqCst);
            }
        }))
        .unwrap();
    ctx.stop_tracker(tracker).unwrap();
    open_gate.send(()).unwrap();
    ctx.wait_for_async_tracker(tracker);
    ctx.wait_for_events();

    assert_eq!(adds.load(Ordering::SeqCst), 0);
    assert!(!framework.registry().has_tracker(tracker));
    framework.stop().unwrap();
}
