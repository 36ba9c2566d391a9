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

//! In-memory keypair generation for ephemeral credentials.
//!
//! Ed25519 is the default: key generation is fast and the keys are compact.
//! RSA exists for hosts whose sshd rejects ed25519. Keys never touch disk;
//! the private half is zeroized when the [`PrivateKey`] is dropped.

use anyhow::{bail, Context, Result};
use russh::keys::ssh_key::private::{KeypairData, RsaKeypair};
use russh::keys::{Algorithm, HashAlg, PrivateKey};
use std::fmt;

/// Minimum allowed RSA key size in bits
pub const MIN_RSA_BITS: u32 = 2048;

/// Maximum allowed RSA key size in bits
pub const MAX_RSA_BITS: u32 = 16384;

const KEY_COMMENT: &str = "hopgate-ephemeral";

/// Algorithm used for an ephemeral keypair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Ed25519,
    Rsa { bits: u32 },
}

impl KeyAlgorithm {
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::Rsa { .. })
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ed25519 => write!(f, "ed25519"),
            Self::Rsa { bits } => write!(f, "rsa-{bits}"),
        }
    }
}

/// Freshly generated keypair with its encoded public half.
pub struct GeneratedKey {
    pub private_key: PrivateKey,
    /// Public key in OpenSSH format (type base64 comment)
    pub public_key_openssh: String,
    /// SHA256 fingerprint of the public key
    pub fingerprint: String,
    pub algorithm: KeyAlgorithm,
}

impl fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("algorithm", &self.algorithm)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Generate a keypair. RSA generation is CPU heavy; call from a blocking thread.
pub fn generate(algorithm: KeyAlgorithm) -> Result<GeneratedKey> {
    let mut keypair = match algorithm {
        KeyAlgorithm::Ed25519 => PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .context("Failed to generate Ed25519 key")?,
        KeyAlgorithm::Rsa { bits } => {
            if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&bits) {
                bail!(
                    "RSA key size must be between {} and {} bits. Got: {}",
                    MIN_RSA_BITS,
                    MAX_RSA_BITS,
                    bits
                );
            }
            let rsa = RsaKeypair::random(&mut rand::thread_rng(), bits as usize)
                .context("Failed to generate RSA key")?;
            PrivateKey::new(KeypairData::from(rsa), KEY_COMMENT)
                .context("Failed to build RSA private key")?
        }
    };
    keypair.set_comment(KEY_COMMENT);

    let public_key = keypair.public_key();
    let fingerprint = format!("{}", public_key.fingerprint(HashAlg::Sha256));
    let public_key_openssh = public_key
        .to_openssh()
        .context("Failed to encode public key to OpenSSH format")?;

    tracing::debug!(%algorithm, %fingerprint, "Generated ephemeral key pair");

    Ok(GeneratedKey {
        private_key: keypair,
        public_key_openssh,
        fingerprint,
        algorithm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_keys_are_unique() {
        let first = generate(KeyAlgorithm::Ed25519).unwrap();
        let second = generate(KeyAlgorithm::Ed25519).unwrap();
        assert!(first.public_key_openssh.starts_with("ssh-ed25519 "));
        assert!(first.fingerprint.starts_with("SHA256:"));
        assert_ne!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_rsa_bits_are_validated() {
        assert!(generate(KeyAlgorithm::Rsa { bits: 1024 }).is_err());
        assert!(generate(KeyAlgorithm::Rsa { bits: 32768 }).is_err());
    }

    #[test]
    fn test_algorithm_display() {
        assert_eq!(KeyAlgorithm::Ed25519.to_string(), "ed25519");
        assert_eq!(KeyAlgorithm::Rsa { bits: 2048 }.to_string(), "rsa-2048");
        assert!(KeyAlgorithm::Rsa { bits: 2048 }.is_rsa());
    }

    #[test]
    fn test_debug_hides_private_key() {
        let key = generate(KeyAlgorithm::Ed25519).unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("fingerprint"));
        assert!(!rendered.contains("private_key"));
    }
}
