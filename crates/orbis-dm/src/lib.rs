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

//! # Orbis Dependency Manager
//!
//! Declarative components on top of the Orbis service registry. A
//! [`Component`] declares the interfaces it provides and the services it
//! depends on; the [`DependencyManager`] tracks those services and drives the
//! component through `init`, `start`, `stop` and `deinit` as they come and go.
//!
//! ```text
//! INACTIVE -> WAITING_FOR_REQUIRED -> INSTANTIATED_AND_WAITING_FOR_REQUIRED -> TRACKING_OPTIONAL
//!                  ^                                                                |
//!                  +------------- suspend (required dependency changed) ------------+
//! ```

#![warn(missing_docs)]

pub mod component;
pub mod dependency;
pub mod info;
mod machine;
pub mod manager;
pub mod state;

pub use component::{Component, ComponentHandle};
pub use dependency::{DependencyStrategy, ServiceDependency};
pub use info::{ComponentInfo, DependencyInfo, DependencyManagerInfo, InterfaceInfo};
pub use machine::DependencyId;
pub use manager::DependencyManager;
pub use state::ComponentState;
