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

//! Validation of the user-supplied pieces of an endpoint string.

use anyhow::{bail, Result};
use std::net::IpAddr;

/// Sanitize hostname to prevent injection in SSH connection strings
///
/// Accepts DNS names, IPv4 literals and IPv6 literals with or without brackets.
pub fn sanitize_hostname(hostname: &str) -> Result<String> {
    if hostname.trim().is_empty() {
        bail!("Empty hostname not allowed");
    }

    const MAX_HOSTNAME_LENGTH: usize = 253; // DNS limit
    if hostname.len() > MAX_HOSTNAME_LENGTH {
        bail!(
            "Hostname too long: {} bytes (max: {} bytes)",
            hostname.len(),
            MAX_HOSTNAME_LENGTH
        );
    }

    let unbracketed = hostname
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(hostname);

    if unbracketed.contains(':') {
        if unbracketed.parse::<IpAddr>().is_err() {
            bail!("Invalid IPv6 address format: {}", hostname);
        }
        return Ok(unbracketed.to_string());
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_';
    if !hostname.chars().all(valid_chars) {
        bail!("Invalid characters in hostname: {}", hostname);
    }

    if hostname.contains("..") {
        bail!("Double dots not allowed in hostname");
    }

    for segment in hostname.split('.') {
        if segment.starts_with('-') || segment.ends_with('-') {
            bail!("Hostname segments cannot start or end with hyphen");
        }
    }

    Ok(hostname.to_string())
}

/// Sanitize username to prevent injection attacks
pub fn sanitize_username(username: &str) -> Result<String> {
    if username.trim().is_empty() {
        bail!("Empty username not allowed");
    }

    // Typical Unix limit
    const MAX_USERNAME_LENGTH: usize = 32;
    if username.len() > MAX_USERNAME_LENGTH {
        bail!(
            "Username too long: {} bytes (max: {} bytes)",
            username.len(),
            MAX_USERNAME_LENGTH
        );
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.';
    if !username.chars().all(valid_chars) {
        bail!("Invalid characters in username: {}", username);
    }

    if let Some(first_char) = username.chars().next() {
        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            bail!("Username must start with letter or underscore");
        }
    }

    Ok(username.to_string())
}

/// Validate a cloud instance identifier of the form `i-<hex>`.
pub fn sanitize_instance_id(instance_id: &str) -> Result<String> {
    let Some(suffix) = instance_id.strip_prefix("i-") else {
        bail!("Instance id must start with 'i-': {}", instance_id);
    };
    // Legacy ids carry 8 hex digits, current ones 17
    if !(8..=17).contains(&suffix.len()) {
        bail!("Instance id has unexpected length: {}", instance_id);
    }
    if !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("Instance id must be hexadecimal after 'i-': {}", instance_id);
    }
    Ok(instance_id.to_ascii_lowercase())
}
