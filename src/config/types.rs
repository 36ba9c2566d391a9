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

//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::utils::expand_tilde;

pub const DEFAULT_USER: &str = "ec2-user";
pub const DEFAULT_PORT: u16 = 22;
/// Upper bound on chain length regardless of configuration
pub const MAX_HOPS_LIMIT: usize = 30;

/// Main configuration structure.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct HopConfig {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub credentials: CredentialSettings,

    #[serde(default)]
    pub tunnel: TunnelSettings,
}

/// Values applied to endpoint strings that omit them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Defaults {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Resolve cloud instances through their private address.
    /// Hops after the first always do.
    #[serde(default)]
    pub use_private_address: bool,
    /// Static key used for endpoints without a cloud instance identity.
    #[serde(default)]
    pub identity_file: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: default_port(),
            use_private_address: false,
            identity_file: None,
        }
    }
}

impl Defaults {
    pub fn identity_path(&self) -> Option<PathBuf> {
        self.identity_file
            .as_ref()
            .map(|p| expand_tilde(std::path::Path::new(p)))
    }
}

/// Host key verification policy.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Accept whatever the server presents. Cloud instances rotate host keys
    /// on every launch, so this is the default.
    #[default]
    AcceptAny,
    /// Check against ~/.ssh/known_hosts
    KnownHosts,
    /// Check against a specific known_hosts file
    KnownHostsFile(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Seconds allowed for each dial, proxied stream open and handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// SSH keepalive interval in seconds. 0 disables keepalives.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Written as `accept_any`, `known_hosts` or `known_hosts_file: <path>`.
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub host_key_policy: HostKeyPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            keepalive_interval: default_keepalive_interval(),
            max_hops: default_max_hops(),
            host_key_policy: HostKeyPolicy::default(),
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval > 0).then(|| Duration::from_secs(self.keepalive_interval))
    }

    /// Effective hop limit, clamped to [`MAX_HOPS_LIMIT`].
    pub fn max_hops(&self) -> usize {
        self.max_hops.clamp(1, MAX_HOPS_LIMIT)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CredentialSettings {
    /// Validity window the instance-connect API grants a pushed key, in seconds.
    #[serde(default = "default_validity")]
    pub validity: u64,
    /// Retry once with an RSA key when the server rejects ed25519.
    #[serde(default = "default_true")]
    pub rsa_fallback: bool,
    #[serde(default = "default_rsa_bits")]
    pub rsa_bits: u32,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            validity: default_validity(),
            rsa_fallback: true,
            rsa_bits: default_rsa_bits(),
        }
    }
}

impl CredentialSettings {
    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.validity)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TunnelSettings {
    /// Local bind address. Loopback unless explicitly widened.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Seconds in-flight relays get to finish after shutdown begins.
    #[serde(default = "default_drain_grace")]
    pub drain_grace: u64,
    /// Milliseconds between bastion liveness checks.
    #[serde(default = "default_session_check_interval")]
    pub session_check_interval: u64,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
            drain_grace: default_drain_grace(),
            session_check_interval: default_session_check_interval(),
        }
    }
}

impl TunnelSettings {
    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace)
    }

    pub fn session_check_interval(&self) -> Duration {
        Duration::from_millis(self.session_check_interval.max(10))
    }
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_keepalive_interval() -> u64 {
    60
}

fn default_max_hops() -> usize {
    10
}

fn default_validity() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_rsa_bits() -> u32 {
    2048
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_buffer_size() -> usize {
    8192
}

fn default_drain_grace() -> u64 {
    5
}

fn default_session_check_interval() -> u64 {
    1000
}
