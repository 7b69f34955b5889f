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

//! Runtime bootstrap: configuration, logging, framework and bundles.

use crate::logging::init_logging;
use anyhow::{Context, Result};
use orbis_core::{BundleId, Properties, PropertyValue};
use orbis_dm::DependencyManager;
use orbis_framework::{BundleActivator, BundleContext, Framework, FrameworkConfig};
use std::path::PathBuf;

/// Assembles a [`Runtime`].
///
/// Configuration is layered, lowest precedence first: the base
/// [`FrameworkConfig`] (or the JSON file when one is given), the properties
/// set on the builder, then the `ORBIS_*` environment variables.
pub struct RuntimeBuilder {
    config: FrameworkConfig,
    config_file: Option<PathBuf>,
    properties: Properties,
    use_env: bool,
    init_logger: bool,
    bundles: Vec<(String, Box<dyn BundleActivator>)>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            config: FrameworkConfig::default(),
            config_file: None,
            properties: Properties::new(),
            use_env: true,
            init_logger: true,
            bundles: Vec::new(),
        }
    }
}

impl RuntimeBuilder {
    /// A builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the base configuration.
    pub fn config(mut self, config: FrameworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads the base configuration from a JSON file at build time.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Sets a framework property; `orbis.framework.*` keys also tune the
    /// framework itself.
    pub fn property(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.set(key, value);
        self
    }

    /// Ignores the `ORBIS_*` environment variables.
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Leaves logger installation to the caller.
    pub fn without_logger(mut self) -> Self {
        self.init_logger = false;
        self
    }

    /// Adds a bundle. Bundles are installed and started in the order they
    /// were added.
    pub fn bundle(mut self, symbolic_name: &str, activator: impl BundleActivator + 'static) -> Self {
        self.bundles.push((symbolic_name.to_string(), Box::new(activator)));
        self
    }

    /// Resolves the configuration without starting anything.
    pub fn resolve_config(&self) -> Result<FrameworkConfig> {
        let mut config = match &self.config_file {
            Some(path) => FrameworkConfig::from_json_file(path)
                .with_context(|| format!("loading runtime configuration from '{}'", path.display()))?,
            None => self.config.clone(),
        };
        config.apply_properties(&self.properties);
        if self.use_env {
            config.apply_env();
        }
        Ok(config)
    }

    /// Starts the framework and every bundle. When a bundle fails to start
    /// the framework is stopped again and the error returned.
    pub fn build(self) -> Result<Runtime> {
        let config = self.resolve_config()?;
        if self.init_logger {
            init_logging(&config.log_level);
        }
        let framework = Framework::new(config).context("starting the framework")?;

        let mut bundle_ids = Vec::with_capacity(self.bundles.len());
        for (name, activator) in self.bundles {
            let started = framework
                .install_bundle(&name, activator)
                .and_then(|id| framework.start_bundle(id).map(|()| id));
            match started {
                Ok(id) => bundle_ids.push(id),
                Err(e) => {
                    if let Err(stop_error) = framework.stop() {
                        log::error!("Stopping the framework after a failed start: {stop_error}");
                    }
                    return Err(e).with_context(|| format!("starting bundle '{name}'"));
                }
            }
        }
        log::info!(
            "Runtime {} up with {} bundle(s)",
            framework.uuid(),
            bundle_ids.len()
        );
        Ok(Runtime {
            framework,
            bundle_ids,
        })
    }
}

/// A running framework together with the bundles it was built with.
///
/// Dropping the runtime shuts it down; [`shutdown`](Self::shutdown) does the
/// same and reports errors.
pub struct Runtime {
    framework: Framework,
    bundle_ids: Vec<BundleId>,
}

impl Runtime {
    /// Shorthand for [`RuntimeBuilder::new`].
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The framework.
    pub fn framework(&self) -> &Framework {
        &self.framework
    }

    /// Context of the framework bundle.
    pub fn context(&self) -> BundleContext {
        self.framework.context()
    }

    /// Ids of the bundles started by the builder, in start order.
    pub fn bundle_ids(&self) -> &[BundleId] {
        &self.bundle_ids
    }

    /// A dependency manager working for the framework bundle. Its components
    /// are removed at shutdown.
    pub fn dependency_manager(&self) -> Result<DependencyManager> {
        Ok(DependencyManager::new(self.context())?)
    }

    /// Stops every bundle, newest first, then the framework.
    pub fn shutdown(self) -> Result<()> {
        self.framework.stop().context("stopping the framework")?;
        log::info!("Runtime {} shut down", self.framework.uuid());
        Ok(())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.framework.is_stopped() {
            if let Err(e) = self.framework.stop() {
                log::error!("Stopping the framework on drop: {e}");
            }
        }
    }
}
