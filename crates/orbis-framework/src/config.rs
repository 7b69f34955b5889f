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

//! Framework configuration.
//!
//! Values are layered, lowest precedence first: [`FrameworkConfig::default`],
//! a JSON file, framework [`Properties`], then `ORBIS_*` environment variables.

use orbis_core::{FrameworkError, Properties, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Property key for the framework uuid.
pub const PROP_UUID: &str = "orbis.framework.uuid";
/// Property key for the event queue warning threshold.
pub const PROP_EVENT_QUEUE_WARNING_THRESHOLD: &str = "orbis.framework.eventQueueWarningThreshold";
/// Property key for the stop timeout, in milliseconds.
pub const PROP_STOP_TIMEOUT_MS: &str = "orbis.framework.stopTimeoutMs";
/// Property key for the log level.
pub const PROP_LOG_LEVEL: &str = "orbis.framework.logLevel";

const ENV_UUID: &str = "ORBIS_FRAMEWORK_UUID";
const ENV_EVENT_QUEUE_WARNING_THRESHOLD: &str = "ORBIS_EVENT_QUEUE_WARNING_THRESHOLD";
const ENV_STOP_TIMEOUT_MS: &str = "ORBIS_STOP_TIMEOUT_MS";
const ENV_LOG_LEVEL: &str = "ORBIS_LOG_LEVEL";

/// Configuration for a [`Framework`](crate::Framework) instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrameworkConfig {
    /// Fixed framework uuid. A random v4 uuid is generated when absent.
    pub uuid: Option<String>,
    /// Queue depth above which the event loop logs a warning on submit.
    pub event_queue_warning_threshold: usize,
    /// Upper bound for blocking teardown waits (bundle stop, unregister
    /// quiescence), in milliseconds.
    pub stop_timeout_ms: u64,
    /// Log level used by the SDK when installing a logger.
    pub log_level: String,
    /// Framework properties visible to every bundle.
    pub properties: Properties,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            uuid: None,
            event_queue_warning_threshold: 1024,
            stop_timeout_ms: 10_000,
            log_level: "info".to_string(),
            properties: Properties::new(),
        }
    }
}

impl FrameworkConfig {
    /// Loads a configuration from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FrameworkError::illegal_argument(format!(
                "cannot read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&text)
    }

    /// Parses a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| FrameworkError::illegal_argument(format!("invalid framework config: {e}")))
    }

    /// Builds a configuration from framework properties on top of the defaults.
    pub fn from_properties(properties: &Properties) -> Self {
        let mut config = Self::default();
        config.apply_properties(properties);
        config
    }

    /// Overrides fields from the `orbis.framework.*` keys and merges every
    /// property into [`properties`](Self::properties).
    pub fn apply_properties(&mut self, properties: &Properties) {
        if let Some(uuid) = properties.get_as_string(PROP_UUID) {
            self.uuid = Some(uuid);
        }
        if let Some(value) = properties.get(PROP_EVENT_QUEUE_WARNING_THRESHOLD) {
            match value.as_long().and_then(|v| usize::try_from(v).ok()) {
                Some(threshold) => self.event_queue_warning_threshold = threshold,
                None => log::warn!(
                    "Ignoring invalid {PROP_EVENT_QUEUE_WARNING_THRESHOLD} value '{value}'"
                ),
            }
        }
        if let Some(value) = properties.get(PROP_STOP_TIMEOUT_MS) {
            match value.as_long().and_then(|v| u64::try_from(v).ok()) {
                Some(timeout) => self.stop_timeout_ms = timeout,
                None => log::warn!("Ignoring invalid {PROP_STOP_TIMEOUT_MS} value '{value}'"),
            }
        }
        if let Some(level) = properties.get_as_string(PROP_LOG_LEVEL) {
            self.log_level = level;
        }
        self.properties.extend_from(properties);
    }

    /// Applies the `ORBIS_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(std::env::vars());
    }

    fn apply_vars(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            match key.as_str() {
                ENV_UUID => self.uuid = Some(value),
                ENV_EVENT_QUEUE_WARNING_THRESHOLD => match value.trim().parse() {
                    Ok(threshold) => self.event_queue_warning_threshold = threshold,
                    Err(_) => log::warn!("Ignoring invalid {key}='{value}'"),
                },
                ENV_STOP_TIMEOUT_MS => match value.trim().parse() {
                    Ok(timeout) => self.stop_timeout_ms = timeout,
                    Err(_) => log::warn!("Ignoring invalid {key}='{value}'"),
                },
                ENV_LOG_LEVEL => self.log_level = value,
                _ => {}
            }
        }
    }

    /// [`stop_timeout_ms`](Self::stop_timeout_ms) as a [`Duration`].
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
