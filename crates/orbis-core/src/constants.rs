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

//! Reserved property keys understood by the registry and the dependency manager.

/// Carries the service name; usable in filters like any other property.
pub const SERVICE_NAME: &str = "objectClass";

/// The registry-assigned service id (Long).
pub const SERVICE_ID: &str = "service.id";

/// Service ranking (Long). Higher wins, ties go to the oldest service.
pub const SERVICE_RANKING: &str = "service.ranking";

/// Service version (Version).
pub const SERVICE_VERSION: &str = "service.version";

/// Id of the bundle that registered the service (Long).
pub const SERVICE_BUNDLE_ID: &str = "service.bundleid";

/// Service scope, either [`SERVICE_SCOPE_SINGLETON`] or [`SERVICE_SCOPE_BUNDLE`].
pub const SERVICE_SCOPE: &str = "service.scope";

/// Scope of a plain service instance shared by every consumer.
pub const SERVICE_SCOPE_SINGLETON: &str = "singleton";

/// Scope of a factory service producing one instance per consuming bundle.
pub const SERVICE_SCOPE_BUNDLE: &str = "bundle";

/// Uuid of the dependency-manager component that provides a service.
pub const COMPONENT_UUID: &str = "component.uuid";

/// Framework property holding the framework instance uuid.
pub const FRAMEWORK_UUID: &str = "framework.uuid";
