/*
 * Copyright (c) 2026. Busbar contributors
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Configuration for the Busbar runtime
///
/// This struct contains all configurable values for the runtime, loaded from
/// TOML files in XDG-compliant directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct BusbarConfig {
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Service surface configuration
    pub service: ServiceConfig,
}

/// Timeout-related configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default deadline for synchronous and asynchronous bus calls, in
    /// milliseconds
    pub call_timeout_ms: u64,
    /// Default bound for `wait_until_running`, in milliseconds
    pub wait_running_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for log files
    pub directory: String,
    /// File name prefix for log files
    pub file_prefix: String,
    /// Whether `init_file_logging` should install a file writer at all
    pub to_file: bool,
}

/// Service surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Implicit topic key used by the parameterless status-family register
    /// call
    pub status_topic: String,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 25_000,
            wait_running_timeout_ms: 5_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file_prefix: "busbar".to_string(),
            to_file: false,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            status_topic: "/status".to_string(),
        }
    }
}

impl BusbarConfig {
    /// Convert the call timeout to a Duration
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.call_timeout_ms)
    }

    /// Convert the `wait_until_running` bound to a Duration
    #[must_use]
    pub const fn wait_running_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.wait_running_timeout_ms)
    }

    /// Load configuration from XDG-compliant locations
    ///
    /// This function attempts to load configuration from
    /// `$XDG_CONFIG_HOME/busbar/config.toml` (with the usual platform
    /// fallbacks the `xdg` crate applies). If no configuration file is found,
    /// returns the default configuration. If a configuration file exists but
    /// is malformed, logs an error and uses defaults.
    #[must_use]
    pub fn load() -> Self {
        use tracing::{error, info};

        let xdg_dirs = match xdg::BaseDirectories::with_prefix("busbar") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        let config_path = xdg_dirs.find_config_file("config.toml");

        if let Some(path) = config_path {
            info!("Loading configuration from: {}", path.display());
            match std::fs::read_to_string(&path) {
                Ok(config_str) => match toml::from_str::<Self>(&config_str) {
                    Ok(config) => config,
                    Err(e) => {
                        error!(
                            "Failed to parse configuration file {}: {}",
                            path.display(),
                            e
                        );
                        Self::default()
                    }
                },
                Err(e) => {
                    error!(
                        "Failed to read configuration file {}: {}",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            info!("No configuration file found, using defaults");
            Self::default()
        }
    }

    /// Installs a non-blocking file writer as the global tracing subscriber.
    ///
    /// Returns the writer's [`tracing_appender::non_blocking::WorkerGuard`];
    /// the caller must keep it alive for the lifetime of the process or
    /// buffered log lines are lost. Returns `Ok(None)` when `[logging]
    /// to_file` is false. Fails if a global subscriber was already installed.
    pub fn init_file_logging(&self) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
        use tracing_appender::rolling::{RollingFileAppender, Rotation};
        use tracing_subscriber::FmtSubscriber;

        if !self.logging.to_file {
            return Ok(None);
        }

        std::fs::create_dir_all(&self.logging.directory)?;
        let appender = RollingFileAppender::new(
            Rotation::DAILY,
            &self.logging.directory,
            &self.logging.file_prefix,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let subscriber = FmtSubscriber::builder()
            .with_writer(non_blocking)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;

        Ok(Some(guard))
    }
}

lazy_static! {
    /// Global configuration instance loaded from XDG-compliant locations
    pub static ref CONFIG: BusbarConfig = BusbarConfig::load();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusbarConfig::default();
        assert_eq!(config.timeouts.call_timeout_ms, 25_000);
        assert_eq!(config.call_timeout(), Duration::from_secs(25));
        assert_eq!(config.service.status_topic, "/status");
        assert!(!config.logging.to_file);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: BusbarConfig = toml::from_str(
            r#"
            [timeouts]
            call_timeout_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.timeouts.call_timeout_ms, 1000);
        // Untouched sections keep their defaults.
        assert_eq!(config.timeouts.wait_running_timeout_ms, 5_000);
        assert_eq!(config.logging.file_prefix, "busbar");
    }
}
