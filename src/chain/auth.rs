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

//! Per-hop authentication material.
//!
//! [`HopAuthenticator::obtain`] is the only place that looks at what kind of
//! endpoint a hop is: cloud-backed endpoints get a freshly provisioned
//! credential, plain endpoints use the configured identity file.

use russh::keys::PrivateKey;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::credential::{CredentialProvisioner, EphemeralCredential, KeyAlgorithm};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::ssh::PendingSession;

/// Key used for one authentication attempt.
#[derive(Debug)]
pub enum AuthMaterial {
    Ephemeral(EphemeralCredential),
    StaticKey { key: Arc<PrivateKey>, path: PathBuf },
}

impl AuthMaterial {
    fn key(&self) -> Arc<PrivateKey> {
        match self {
            Self::Ephemeral(credential) => credential.private_key(),
            Self::StaticKey { key, .. } => Arc::clone(key),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Ephemeral(credential) => format!(
                "ephemeral {} key {}",
                credential.algorithm(),
                credential.fingerprint()
            ),
            Self::StaticKey { path, .. } => format!("key file {}", path.display()),
        }
    }
}

/// Produces and applies authentication material for hops.
#[derive(Debug, Clone)]
pub struct HopAuthenticator {
    provisioner: CredentialProvisioner,
    identity_file: Option<PathBuf>,
    rsa_fallback: bool,
}

impl HopAuthenticator {
    pub fn new(
        provisioner: CredentialProvisioner,
        identity_file: Option<PathBuf>,
        rsa_fallback: bool,
    ) -> Self {
        Self {
            provisioner,
            identity_file,
            rsa_fallback,
        }
    }

    /// Obtain authentication material for `endpoint`.
    pub async fn obtain(&self, endpoint: &Endpoint) -> Result<AuthMaterial> {
        if let Some(identity) = endpoint.instance() {
            let credential = self.provisioner.provision(identity, endpoint.user()).await?;
            return Ok(AuthMaterial::Ephemeral(credential));
        }

        let Some(path) = &self.identity_file else {
            return Err(Error::Config(format!(
                "no authentication material for {endpoint}: it has no instance identity and no identity_file is configured"
            )));
        };
        let key = load_identity_file(path.clone()).await?;
        Ok(AuthMaterial::StaticKey {
            key: Arc::new(key),
            path: path.clone(),
        })
    }

    /// Authenticate `pending` as `endpoint.user()`, consuming `material`.
    ///
    /// An ephemeral ed25519 key rejected by the server is retried once with a
    /// freshly provisioned RSA key when the fallback is enabled.
    pub async fn authenticate(
        &self,
        pending: &mut dyn PendingSession,
        endpoint: &Endpoint,
        material: AuthMaterial,
    ) -> Result<()> {
        let user = endpoint.user();
        debug!(endpoint = %endpoint, material = %material.describe(), "Authenticating");

        if pending.authenticate(user, material.key()).await? {
            return Ok(());
        }

        let retry_identity = match &material {
            AuthMaterial::Ephemeral(credential)
                if self.rsa_fallback && credential.algorithm() == KeyAlgorithm::Ed25519 =>
            {
                Some(credential.instance().clone())
            }
            _ => None,
        };
        let rejected = material.describe();
        drop(material);

        if let Some(identity) = retry_identity {
            warn!(endpoint = %endpoint, "ed25519 key rejected, retrying with RSA");
            let credential = self
                .provisioner
                .provision_with(&identity, user, self.provisioner.rsa_algorithm())
                .await?;
            let accepted = pending.authenticate(user, credential.private_key()).await?;
            let fingerprint = credential.fingerprint().to_string();
            drop(credential);
            if accepted {
                return Ok(());
            }
            return Err(Error::AuthorizationDenied(format!(
                "{endpoint} rejected {rejected} and RSA key {fingerprint}"
            )));
        }

        Err(Error::AuthorizationDenied(format!(
            "{endpoint} rejected {rejected}"
        )))
    }
}

async fn load_identity_file(path: PathBuf) -> Result<PrivateKey> {
    let contents = Zeroizing::new(tokio::fs::read_to_string(&path).await.map_err(|e| {
        Error::Config(format!("failed to read identity file {}: {e}", path.display()))
    })?);

    if contents.contains("ENCRYPTED") {
        return Err(Error::Config(format!(
            "identity file {} is passphrase protected, which is not supported",
            path.display()
        )));
    }

    russh::keys::decode_secret_key(&contents, None).map_err(|e| {
        Error::Config(format!(
            "failed to decode identity file {}: {e}",
            path.display()
        ))
    })
}
