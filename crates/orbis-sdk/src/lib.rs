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

//! The public-facing API of the Orbis runtime.
//!
//! Applications build a [`Runtime`] from bundle activators, then work with
//! services through [`BundleContext`](orbis_framework::BundleContext) and
//! with components through [`DependencyManager`](orbis_dm::DependencyManager).
//!
//! ```no_run
//! use orbis_sdk::prelude::*;
//!
//! struct Hello;
//!
//! impl BundleActivator for Hello {
//!     fn start(&mut self, context: &BundleContext) -> anyhow::Result<()> {
//!         context.register_service(Arc::new("hello".to_string()), "greeting", None)?;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let runtime = Runtime::builder().bundle("hello", Hello).build()?;
//!     runtime.context().use_service("greeting", |g: Arc<String>| log::info!("{g}"));
//!     runtime.shutdown()
//! }
//! ```

#![warn(missing_docs)]

pub mod logging;
pub mod runtime;

pub use logging::init_logging;
pub use runtime::{Runtime, RuntimeBuilder};

pub use orbis_core;
pub use orbis_dm;
pub use orbis_framework;

/// Everything an application usually needs.
pub mod prelude {
    pub use crate::{init_logging, Runtime, RuntimeBuilder};
    pub use orbis_core::{
        BundleId, Filter, FrameworkError, Properties, PropertyValue, ServiceId, Status, TrackerId,
        Version, VersionRange,
    };
    pub use orbis_dm::{
        Component, ComponentHandle, ComponentState, DependencyManager, DependencyStrategy,
        ServiceDependency,
    };
    pub use orbis_framework::{
        BundleActivator, BundleContext, Framework, FrameworkConfig, RegistrationOptions,
        ServiceTrackingOptions, UseServiceOptions,
    };
    pub use std::sync::Arc;
}
