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

//! Ephemeral per-hop credentials.
//!
//! Each [`CredentialProvisioner::provision`] call generates a brand new
//! keypair and pushes its public half through the instance-connect API for a
//! short window. The window is reported on the returned
//! [`EphemeralCredential`] but never enforced locally: an expired key is
//! rejected by the remote sshd, which surfaces as `AuthorizationDenied`.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use hopgate::cloud::{InstanceConnectApi, InstanceIdentity};
//! # use hopgate::config::CredentialSettings;
//! # use hopgate::credential::{CredentialProvisioner, SystemClock};
//! # async fn demo(api: Arc<dyn InstanceConnectApi>) -> hopgate::Result<()> {
//! let provisioner =
//!     CredentialProvisioner::new(api, Arc::new(SystemClock), &CredentialSettings::default());
//! let identity = InstanceIdentity::new("i-0abc1234", "ap-northeast-2a");
//! let credential = provisioner.provision(&identity, "ec2-user").await?;
//! println!("valid until {}", credential.valid_until());
//! # Ok(())
//! # }
//! ```

mod clock;
mod keypair;

pub use clock::{Clock, SystemClock};
pub use keypair::{generate as generate_keypair, GeneratedKey, KeyAlgorithm, MAX_RSA_BITS, MIN_RSA_BITS};

use chrono::{DateTime, Utc};
use russh::keys::PrivateKey;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cloud::{InstanceConnectApi, InstanceIdentity, SendSshPublicKey};
use crate::config::CredentialSettings;
use crate::error::{Error, Result};

/// A short-lived keypair registered for one instance and OS user.
///
/// Deliberately not `Clone`: a credential is consumed by exactly one
/// authentication attempt and dropped afterwards.
pub struct EphemeralCredential {
    private_key: Arc<PrivateKey>,
    public_key_openssh: String,
    fingerprint: String,
    algorithm: KeyAlgorithm,
    instance: InstanceIdentity,
    os_user: String,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
}

impl EphemeralCredential {
    pub fn private_key(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.private_key)
    }

    pub fn public_key_openssh(&self) -> &str {
        &self.public_key_openssh
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn instance(&self) -> &InstanceIdentity {
        &self.instance
    }

    pub fn os_user(&self) -> &str {
        &self.os_user
    }

    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }

    pub fn valid_until(&self) -> DateTime<Utc> {
        self.valid_until
    }

    /// Whether `now` falls inside the reported validity window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_from && now < self.valid_until
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("instance", &self.instance)
            .field("os_user", &self.os_user)
            .field("algorithm", &self.algorithm)
            .field("fingerprint", &self.fingerprint)
            .field("valid_from", &self.valid_from)
            .field("valid_until", &self.valid_until)
            .finish_non_exhaustive()
    }
}

/// Generates ephemeral keys and registers them through the instance-connect API.
#[derive(Clone)]
pub struct CredentialProvisioner {
    api: Arc<dyn InstanceConnectApi>,
    clock: Arc<dyn Clock>,
    validity: Duration,
    rsa_bits: u32,
}

impl CredentialProvisioner {
    pub fn new(
        api: Arc<dyn InstanceConnectApi>,
        clock: Arc<dyn Clock>,
        settings: &CredentialSettings,
    ) -> Self {
        Self {
            api,
            clock,
            validity: settings.validity(),
            rsa_bits: settings.rsa_bits,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The RSA variant used when a host rejects ed25519.
    pub fn rsa_algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::Rsa {
            bits: self.rsa_bits,
        }
    }

    /// Provision an ed25519 credential for `os_user` on `identity`.
    pub async fn provision(
        &self,
        identity: &InstanceIdentity,
        os_user: &str,
    ) -> Result<EphemeralCredential> {
        self.provision_with(identity, os_user, KeyAlgorithm::Ed25519)
            .await
    }

    /// Provision a credential using a specific key algorithm.
    pub async fn provision_with(
        &self,
        identity: &InstanceIdentity,
        os_user: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<EphemeralCredential> {
        if os_user.trim().is_empty() {
            return Err(Error::invalid_endpoint(
                identity.instance_id.clone(),
                "OS user must not be empty",
            ));
        }

        let generated = tokio::task::spawn_blocking(move || keypair::generate(algorithm))
            .await
            .map_err(|e| Error::Internal(format!("key generation task failed: {e}")))?
            .map_err(|e| Error::Internal(format!("{e:#}")))?;

        let request = SendSshPublicKey {
            instance_id: identity.instance_id.clone(),
            availability_zone: identity.availability_zone.clone(),
            os_user: os_user.to_string(),
            public_key: generated.public_key_openssh.clone(),
        };

        if let Err(e) = self.api.send_ssh_public_key(request).await {
            tracing::warn!(
                instance = %identity.instance_id,
                user = %os_user,
                error = %e,
                "Failed to register ephemeral key"
            );
            return Err(e.into());
        }

        let valid_from = self.clock.now();
        let valid_until = valid_from
            + chrono::Duration::from_std(self.validity)
                .map_err(|e| Error::Config(format!("credential validity out of range: {e}")))?;

        tracing::info!(
            instance = %identity.instance_id,
            zone = %identity.availability_zone,
            user = %os_user,
            algorithm = %generated.algorithm,
            fingerprint = %generated.fingerprint,
            valid_until = %valid_until,
            "Registered ephemeral key"
        );

        Ok(EphemeralCredential {
            private_key: Arc::new(generated.private_key),
            public_key_openssh: generated.public_key_openssh,
            fingerprint: generated.fingerprint,
            algorithm: generated.algorithm,
            instance: identity.clone(),
            os_user: os_user.to_string(),
            valid_from,
            valid_until,
        })
    }
}

impl fmt::Debug for CredentialProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvisioner")
            .field("validity", &self.validity)
            .field("rsa_bits", &self.rsa_bits)
            .finish_non_exhaustive()
    }
}
