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

//! # Orbis Framework
//!
//! The dynamic service layer of Orbis. A [`Framework`] owns a
//! [`ServiceRegistry`] and a single serialized [`EventLoop`]; bundles reach
//! both through their [`BundleContext`] to register services, look them up,
//! use them safely while other threads unregister them, and track their
//! arrival and departure with callbacks.
//!
//! Every state change of the registry is applied on the event loop thread, so
//! tracker callbacks observe one total order of events.

#![warn(missing_docs)]

pub mod bundle;
pub mod config;
pub mod context;
pub mod event_loop;
pub mod framework;
pub mod options;
pub mod registration;
pub mod registry;
mod sync;
pub mod tracker;

pub use bundle::{BundleActivator, BundleState};
pub use config::FrameworkConfig;
pub use context::BundleContext;
pub use event_loop::{Completion, CompletionState, EventLoop};
pub use framework::Framework;
pub use options::{RegistrationOptions, UseServiceOptions, UseTrackedOptions};
pub use registration::{ServiceFactory, ServiceInstance, ServiceReference};
pub use registry::{ServiceQuery, ServiceRegistry};
pub use tracker::{MetaTrackerOptions, ServiceTrackerInfo, ServiceTrackingOptions, TrackedService};

pub use orbis_core;
