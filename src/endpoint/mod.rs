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

//! SSH endpoints and their address resolution.
//!
//! An [`Endpoint`] is either a plain address (tunnel destinations, hosts
//! authenticated with a static key) or backed by a cloud instance identity,
//! in which case credentials are pushed through the instance-connect API and
//! the address comes from the inventory.
//!
//! # Examples
//!
//! ```
//! use hopgate::endpoint::{Endpoint, EndpointDefaults};
//!
//! let defaults = EndpointDefaults::default();
//! let endpoint = Endpoint::parse("ubuntu@10.0.1.20", &defaults).unwrap();
//! assert_eq!(endpoint.user(), "ubuntu");
//! assert_eq!(endpoint.port(), 22);
//! ```

mod address;
mod parser;

pub use address::resolved_address;
pub use parser::{parse_endpoint_spec, parse_host_port, parse_port, EndpointSpec};

use std::fmt;

use crate::cloud::{InstanceIdentity, InstanceInventory, InstanceRecord};
use crate::config::{Defaults, DEFAULT_PORT, DEFAULT_USER};
use crate::error::{Error, Result};
use crate::utils::{sanitize_hostname, sanitize_instance_id, sanitize_username};

/// Values applied to endpoint strings that omit them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDefaults {
    pub user: String,
    pub port: u16,
    pub use_private_address: bool,
}

impl Default for EndpointDefaults {
    fn default() -> Self {
        Self {
            user: DEFAULT_USER.to_string(),
            port: DEFAULT_PORT,
            use_private_address: false,
        }
    }
}

impl From<&Defaults> for EndpointDefaults {
    fn from(defaults: &Defaults) -> Self {
        Self {
            user: defaults.user.clone(),
            port: defaults.port,
            use_private_address: defaults.use_private_address,
        }
    }
}

/// An addressable SSH target. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
    user: String,
    instance: Option<InstanceIdentity>,
    use_private_address: bool,
}

impl Endpoint {
    /// Plain endpoint addressed by `host` verbatim.
    ///
    /// Rejects port 0, an empty user and malformed host or user names, the
    /// same way [`Endpoint::parse`] does.
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Result<Self> {
        let (host, user) = (host.into(), user.into());
        let spec = format!("{user}@{host}:{port}");
        if port == 0 {
            return Err(Error::invalid_endpoint(spec, "port must be between 1 and 65535"));
        }
        let host =
            sanitize_hostname(&host).map_err(|e| Error::invalid_endpoint(&spec, format!("{e:#}")))?;
        let user =
            sanitize_username(&user).map_err(|e| Error::invalid_endpoint(&spec, format!("{e:#}")))?;
        Ok(Self {
            host,
            port,
            user,
            instance: None,
            use_private_address: false,
        })
    }

    /// Parse `[user@]host[:port]`, filling absent parts from `defaults`.
    pub fn parse(spec: &str, defaults: &EndpointDefaults) -> Result<Self> {
        let parsed = parse_endpoint_spec(spec)
            .map_err(|e| Error::invalid_endpoint(spec, format!("{e:#}")))?;
        let endpoint = Self::new(
            parsed.host,
            parsed.port.unwrap_or(defaults.port),
            parsed.user.unwrap_or_else(|| defaults.user.clone()),
        )
        .map_err(|e| match e {
            Error::InvalidEndpoint { reason, .. } => Error::invalid_endpoint(spec, reason),
            other => other,
        })?;
        Ok(endpoint.with_private_address(defaults.use_private_address))
    }

    /// Parse `[user@]instance-id[:port]` and attach the instance's cloud
    /// identity from the inventory.
    pub async fn for_instance(
        spec: &str,
        inventory: &dyn InstanceInventory,
        defaults: &EndpointDefaults,
    ) -> Result<Self> {
        let endpoint = Self::parse(spec, defaults)?;
        let instance_id = sanitize_instance_id(&endpoint.host)
            .map_err(|e| Error::invalid_endpoint(spec, format!("{e:#}")))?;
        let record = inventory.describe_instance(&instance_id).await?;
        tracing::debug!(
            instance = %record.instance_id,
            zone = %record.availability_zone,
            "Resolved instance identity"
        );
        Ok(Self {
            host: instance_id,
            ..endpoint
        }
        .with_instance(record.identity()))
    }

    /// Endpoint for an inventory record, e.g. one picked by bastion discovery.
    pub fn from_record(
        record: &InstanceRecord,
        user: impl Into<String>,
        port: u16,
    ) -> Result<Self> {
        Ok(Self::new(&record.instance_id, port, user)?.with_instance(record.identity()))
    }

    pub fn with_instance(mut self, identity: InstanceIdentity) -> Self {
        self.instance = Some(identity);
        self
    }

    pub fn with_private_address(mut self, use_private_address: bool) -> Self {
        self.use_private_address = use_private_address;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn instance(&self) -> Option<&InstanceIdentity> {
        self.instance.as_ref()
    }

    pub fn use_private_address(&self) -> bool {
        self.use_private_address
    }

    /// Copy of this endpoint as seen from hop position `hop`.
    ///
    /// Hops after the first are reachable only from inside the previous hop's
    /// network, so they always resolve through the private address.
    pub fn for_hop(&self, hop: usize) -> Self {
        let mut endpoint = self.clone();
        if hop > 0 {
            endpoint.use_private_address = true;
        }
        endpoint
    }

    /// `user@host:port` label used in logs and errors.
    pub fn label(&self) -> String {
        if self.host.contains(':') {
            format!("{}@[{}]:{}", self.user, self.host, self.port)
        } else {
            format!("{}@{}:{}", self.user, self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Fixed `host:port` destination of a tunnel. Never a cloud identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
}

impl TunnelTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`; the port is mandatory.
    pub fn parse(spec: &str) -> Result<Self> {
        let (host, port) =
            parse_host_port(spec.trim()).map_err(|e| Error::invalid_endpoint(spec, format!("{e:#}")))?;
        let port = port.ok_or_else(|| Error::invalid_endpoint(spec, "tunnel target needs a port"))?;
        let host = sanitize_hostname(&host)
            .map_err(|e| Error::invalid_endpoint(spec, format!("{e:#}")))?;
        Ok(Self { host, port })
    }
}

impl fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
