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

//! Host and port parsing utilities

use anyhow::{bail, Context, Result};

use crate::utils::{sanitize_hostname, sanitize_username};

/// Pieces of an `[user@]host[:port]` string before defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

/// Parse an endpoint specification
///
/// Handles the format: `[user@]hostname[:port]`
/// * IPv6 addresses are supported: `[::1]:2222` or `user@[::1]:2222`
/// * Port parsing is disambiguated from IPv6 colons
pub fn parse_endpoint_spec(spec: &str) -> Result<EndpointSpec> {
    let spec = spec.trim();
    if spec.is_empty() {
        bail!("Empty endpoint specification");
    }

    let (user, host_port) = match spec.rsplit_once('@') {
        Some((user, rest)) => (Some(user), rest),
        None => (None, spec),
    };

    let user = user
        .map(|u| sanitize_username(u).context("Invalid username"))
        .transpose()?;

    let (host, port) = parse_host_port(host_port)
        .with_context(|| format!("Invalid host:port specification: '{host_port}'"))?;

    let host = sanitize_hostname(&host).context("Invalid hostname")?;

    Ok(EndpointSpec { user, host, port })
}

/// Parse host:port specification with IPv6 support
///
/// Handles various formats:
/// * `hostname` -> (hostname, None)
/// * `hostname:port` -> (hostname, Some(port))
/// * `[::1]` -> (::1, None)
/// * `[::1]:port` -> (::1, Some(port))
/// * `2001:db8::1` -> (2001:db8::1, None)
pub fn parse_host_port(host_port: &str) -> Result<(String, Option<u16>)> {
    if host_port.is_empty() {
        bail!("Empty host specification");
    }

    if let Some(rest) = host_port.strip_prefix('[') {
        let Some(bracket_end) = rest.find(']') else {
            bail!("Unclosed bracket in IPv6 address");
        };
        let ipv6_addr = &rest[..bracket_end];
        if ipv6_addr.is_empty() {
            bail!("Empty IPv6 address in brackets");
        }

        let remaining = &rest[bracket_end + 1..];
        if remaining.is_empty() {
            return Ok((ipv6_addr.to_string(), None));
        }
        let Some(port_str) = remaining.strip_prefix(':') else {
            bail!("Invalid characters after IPv6 address: '{remaining}'");
        };
        return Ok((ipv6_addr.to_string(), Some(parse_port(port_str)?)));
    }

    // More than one colon without brackets can only be a bare IPv6 literal
    if host_port.matches(':').count() > 1 {
        return Ok((host_port.to_string(), None));
    }

    match host_port.split_once(':') {
        Some((host, port_str)) => {
            if host.is_empty() {
                bail!("Empty hostname");
            }
            Ok((host.to_string(), Some(parse_port(port_str)?)))
        }
        None => Ok((host_port.to_string(), None)),
    }
}

/// Parse a port number, rejecting 0.
pub fn parse_port(port_str: &str) -> Result<u16> {
    if port_str.is_empty() {
        bail!("Empty port specification");
    }
    let port = port_str
        .parse::<u16>()
        .with_context(|| format!("Invalid port number: '{port_str}'"))?;
    if port == 0 {
        bail!("Port number cannot be zero");
    }
    Ok(port)
}
