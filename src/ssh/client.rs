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

//! russh-backed [`Transport`].
//!
//! Hop 0 runs `connect_stream` over a `TcpStream`; later hops run it over the
//! `ChannelStream` of a `direct-tcpip` channel opened on the previous hop, so
//! every session after the first is nested inside its parent's encryption.

use async_trait::async_trait;
use russh::client::{Config, Handle};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;

use super::handler::ClientHandler;
use super::transport::{BoxedStream, HopSession, PendingSession, PtyRequest, Transport};
use crate::config::{ConnectionSettings, HostKeyPolicy};
use crate::error::{Error, Result};

/// Production transport built on russh.
pub struct RusshTransport {
    config: Arc<Config>,
    host_key_policy: HostKeyPolicy,
}

impl RusshTransport {
    pub fn new(settings: &ConnectionSettings) -> Self {
        let config = Config {
            keepalive_interval: settings.keepalive_interval(),
            keepalive_max: 3,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            host_key_policy: settings.host_key_policy.clone(),
        }
    }
}

impl fmt::Debug for RusshTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RusshTransport")
            .field("host_key_policy", &self.host_key_policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::connection_failed(format!("{host}:{port}"), e))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}:{}: {}", host, port, e);
        }
        Ok(Box::new(stream))
    }

    async fn handshake(
        &self,
        stream: BoxedStream,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn PendingSession>> {
        let handler = ClientHandler::new(host.to_string(), port, self.host_key_policy.clone());
        let handle = russh::client::connect_stream(Arc::clone(&self.config), stream, handler)
            .await
            .map_err(|e| match e {
                russh::Error::UnknownKey => {
                    Error::HandshakeFailed(format!("host key for {host}:{port} was not accepted"))
                }
                other => Error::HandshakeFailed(format!("{host}:{port}: {other}")),
            })?;

        Ok(Box::new(RusshPendingSession {
            handle,
            peer: format!("{host}:{port}"),
        }))
    }
}

struct RusshPendingSession {
    handle: Handle<ClientHandler>,
    peer: String,
}

#[async_trait]
impl PendingSession for RusshPendingSession {
    async fn authenticate(&mut self, user: &str, key: Arc<PrivateKey>) -> Result<bool> {
        let hash_alg = self
            .handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| Error::HandshakeFailed(format!("{}: {e}", self.peer)))?
            .flatten();

        let auth_result = self
            .handle
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
            .await
            .map_err(|e| Error::HandshakeFailed(format!("{}: {e}", self.peer)))?;

        Ok(auth_result.success())
    }

    fn into_session(self: Box<Self>) -> Arc<dyn HopSession> {
        Arc::new(RusshSession {
            handle: self.handle,
            peer: self.peer,
        })
    }

    async fn abandon(self: Box<Self>) {
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::AuthCancelledByUser, "", "")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.peer, e);
        }
    }
}

struct RusshSession {
    handle: Handle<ClientHandler>,
    peer: String,
}

impl RusshSession {
    fn channel_error(&self, target: String, err: russh::Error) -> Error {
        if self.handle.is_closed() {
            Error::TransportLost(format!("session to {} is closed", self.peer))
        } else {
            Error::connection_failed(target, err)
        }
    }
}

#[async_trait]
impl HopSession for RusshSession {
    async fn open_proxied_stream(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host.to_string(), u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| self.channel_error(format!("{host}:{port} via {}", self.peer), e))?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn open_shell(&self, pty: &PtyRequest) -> Result<BoxedStream> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.channel_error(format!("shell on {}", self.peer), e))?;

        channel
            .request_pty(false, &pty.term, pty.cols, pty.rows, 0, 0, &[])
            .await
            .map_err(|e| self.channel_error(format!("pty on {}", self.peer), e))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| self.channel_error(format!("shell on {}", self.peer), e))?;

        Ok(Box::new(channel.into_stream()))
    }

    async fn close(&self) {
        if self.handle.is_closed() {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.peer, e);
        }
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}
