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

use russh::client::Handler;

use crate::config::{expand_tilde, HostKeyPolicy};

/// SSH client handler for managing server key verification.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub fn new(hostname: String, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            hostname,
            port,
            policy,
        }
    }
}

impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let result = match &self.policy {
            HostKeyPolicy::AcceptAny => return Ok(true),
            HostKeyPolicy::KnownHosts => {
                russh::keys::check_known_hosts(&self.hostname, self.port, server_public_key)
            }
            HostKeyPolicy::KnownHostsFile(path) => russh::keys::check_known_hosts_path(
                &self.hostname,
                self.port,
                server_public_key,
                expand_tilde(std::path::Path::new(path)),
            ),
        };

        match result {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::warn!(host = %self.hostname, "Host key not present in known_hosts");
                Ok(false)
            }
            Err(e) => {
                // A changed key shows up here as well.
                tracing::warn!(host = %self.hostname, error = %e, "Host key verification failed");
                Ok(false)
            }
        }
    }
}
