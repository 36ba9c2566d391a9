// Copyright 2025 Lablup Inc. and Jeongkyu Shin
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

//! Configuration loading and priority management.

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::HopConfig;
use super::utils::{env_override, expand_tilde};
use crate::credential::{MAX_RSA_BITS, MIN_RSA_BITS};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "HOPGATE_CONFIG";

impl HopConfig {
    /// Load configuration from a file.
    ///
    /// A missing file is not an error; defaults are returned instead.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_tilde(path);

        if !expanded_path.exists() {
            tracing::debug!(
                "Config file not found at {:?}, using defaults",
                expanded_path
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&expanded_path)
            .await
            .with_context(|| format!("Failed to read configuration file at {}. Please check file permissions and ensure the file is accessible.", expanded_path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse YAML configuration file at {}. Please check the YAML syntax is valid.", expanded_path.display()))
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: HopConfig = if content.trim().is_empty() {
            HopConfig::default()
        } else {
            serde_yaml::from_str(content).context("Invalid configuration document")?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with priority order:
    /// 1. Explicit path argument
    /// 2. `HOPGATE_CONFIG` environment variable
    /// 3. `./hopgate.yaml` in the current directory
    /// 4. XDG config directory (`~/.config/hopgate/config.yaml` on Linux)
    /// 5. Built-in defaults
    ///
    /// Environment overrides are applied on top of whichever source won.
    pub async fn load_with_priority(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::locate(explicit) {
            Some(path) => {
                tracing::debug!("Loading configuration from {:?}", path);
                Self::load(&path).await?
            }
            None => {
                tracing::debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                return Some(expanded);
            }
            tracing::debug!(
                "Explicit config file not found, continuing with other sources: {:?}",
                expanded
            );
        }

        if let Ok(env_path) = env::var(CONFIG_ENV) {
            let expanded = expand_tilde(Path::new(&env_path));
            if expanded.exists() {
                return Some(expanded);
            }
        }

        let local = PathBuf::from("hopgate.yaml");
        if local.exists() {
            return Some(local);
        }

        if let Some(proj_dirs) = ProjectDirs::from("", "", "hopgate") {
            let xdg = proj_dirs.config_dir().join("config.yaml");
            if xdg.exists() {
                return Some(xdg);
            }
        }

        None
    }

    /// Apply `HOPGATE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(user) = env::var("HOPGATE_USER") {
            if !user.trim().is_empty() {
                self.defaults.user = user.trim().to_string();
            }
        }
        if let Some(port) = env_override::<u16>("HOPGATE_PORT") {
            self.defaults.port = port;
        }
        if let Ok(identity) = env::var("HOPGATE_IDENTITY_FILE") {
            self.defaults.identity_file = Some(identity);
        }
        if let Some(timeout) = env_override::<u64>("HOPGATE_CONNECT_TIMEOUT") {
            self.connection.connect_timeout = timeout;
        }
    }

    /// Reject values the connectivity layer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.defaults.user.trim().is_empty() {
            bail!("defaults.user must not be empty");
        }
        if self.defaults.port == 0 {
            bail!("defaults.port must be between 1 and 65535");
        }
        if self.connection.connect_timeout == 0 {
            bail!("connection.connect_timeout must be at least 1 second");
        }
        if self.credentials.validity == 0 {
            bail!("credentials.validity must be at least 1 second");
        }
        if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&self.credentials.rsa_bits) {
            bail!(
                "credentials.rsa_bits must be between {} and {}, got {}",
                MIN_RSA_BITS,
                MAX_RSA_BITS,
                self.credentials.rsa_bits
            );
        }
        if self.tunnel.max_connections == 0 {
            bail!("tunnel.max_connections must be at least 1");
        }
        if self.tunnel.buffer_size == 0 {
            bail!("tunnel.buffer_size must be at least 1");
        }
        Ok(())
    }
}
