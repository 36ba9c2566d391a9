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

//! Cloud collaborators consumed by the connectivity layer.
//!
//! Concrete API clients live outside this crate. They plug in through two
//! capabilities:
//!
//! - [`InstanceInventory`]: address lookup by instance id
//! - [`InstanceConnectApi`]: push a short-lived public key for an instance and OS user

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::error::Error;

/// Cloud identity of an instance that accepts pushed keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub availability_zone: String,
}

impl InstanceIdentity {
    pub fn new(instance_id: impl Into<String>, availability_zone: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            availability_zone: availability_zone.into(),
        }
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.instance_id, self.availability_zone)
    }
}

/// Inventory record for one instance.
///
/// Either address may be absent: instances without a public IP are common,
/// and stopped instances have neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub availability_zone: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
}

impl InstanceRecord {
    pub fn identity(&self) -> InstanceIdentity {
        InstanceIdentity::new(&self.instance_id, &self.availability_zone)
    }
}

/// Request to register an ephemeral public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSshPublicKey {
    pub instance_id: String,
    pub availability_zone: String,
    pub os_user: String,
    /// OpenSSH encoded public key (`ssh-ed25519 AAAA...`)
    pub public_key: String,
}

/// Failures reported by cloud API implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("request throttled: {0}")]
    Throttled(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Other(String),
}

impl From<CloudError> for Error {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::NotFound(msg) => Error::NotFound(msg),
            CloudError::AccessDenied(msg) => Error::AuthorizationDenied(msg),
            CloudError::Throttled(msg) | CloudError::Unavailable(msg) => Error::Transient(msg),
            // Unclassified API failures are treated as transient; the caller decides on retry.
            CloudError::Other(msg) => Error::Transient(msg),
        }
    }
}

/// Address lookup by instance id.
#[async_trait]
pub trait InstanceInventory: Send + Sync {
    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceRecord, CloudError>;
}

/// Registration of ephemeral public keys.
///
/// Registration is idempotent per (instance, user): pushing a new key re-arms
/// the validity window and leaves earlier keys valid until their own expiry.
#[async_trait]
pub trait InstanceConnectApi: Send + Sync {
    async fn send_ssh_public_key(&self, request: SendSshPublicKey) -> Result<(), CloudError>;
}
