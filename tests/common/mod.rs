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

//! In-memory cloud, clock and SSH transport used by the integration tests.
//!
//! The mock transport authorizes a key only if the mock cloud has a matching,
//! unexpired registration for the instance behind the dialed address, so the
//! tests exercise the same provisioning path production code does.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use hopgate::cloud::{
    CloudError, InstanceConnectApi, InstanceInventory, InstanceRecord, SendSshPublicKey,
};
use hopgate::config::HopConfig;
use hopgate::credential::Clock;
use hopgate::error::{Error, Result};
use hopgate::ssh::{BoxedStream, HopSession, PendingSession, PtyRequest, Transport};
use hopgate::Connectivity;
use russh::keys::{Algorithm, PrivateKey, PublicKey};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub const ZONE: &str = "ap-northeast-2a";

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()),
        })
    }

    pub fn advance(&self, by: ChronoDuration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub instance_id: String,
    pub availability_zone: String,
    pub os_user: String,
    pub public_key: String,
    pub at: DateTime<Utc>,
}

/// Inventory plus instance-connect API.
pub struct MockCloud {
    clock: Arc<MockClock>,
    validity: ChronoDuration,
    records: Mutex<HashMap<String, InstanceRecord>>,
    registrations: Mutex<Vec<Registration>>,
    fail_with: Mutex<Option<CloudError>>,
}

impl MockCloud {
    pub fn new(clock: Arc<MockClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            validity: ChronoDuration::seconds(60),
            records: Mutex::new(HashMap::new()),
            registrations: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        })
    }

    pub fn add_instance(&self, instance_id: &str, public_ip: Option<&str>, private_ip: Option<&str>) {
        self.records.lock().unwrap().insert(
            instance_id.to_string(),
            InstanceRecord {
                instance_id: instance_id.to_string(),
                availability_zone: ZONE.to_string(),
                private_ip: private_ip.map(str::to_string),
                public_ip: public_ip.map(str::to_string),
            },
        );
    }

    pub fn record(&self, instance_id: &str) -> InstanceRecord {
        self.records.lock().unwrap()[instance_id].clone()
    }

    pub fn fail_registrations_with(&self, err: CloudError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.registrations.lock().unwrap().clone()
    }

    /// Whether `key` may log in as `user` on the instance reachable at `address`.
    pub fn is_authorized(&self, address: &str, user: &str, key: &PrivateKey) -> bool {
        let records = self.records.lock().unwrap();
        let Some(record) = records.values().find(|r| {
            r.private_ip.as_deref() == Some(address) || r.public_ip.as_deref() == Some(address)
        }) else {
            return false;
        };
        let now = self.clock.now();
        self.registrations.lock().unwrap().iter().any(|reg| {
            reg.instance_id == record.instance_id
                && reg.os_user == user
                && now < reg.at + self.validity
                && PublicKey::from_openssh(&reg.public_key)
                    .map(|registered| registered.key_data() == key.public_key().key_data())
                    .unwrap_or(false)
        })
    }
}

#[async_trait]
impl InstanceInventory for MockCloud {
    async fn describe_instance(
        &self,
        instance_id: &str,
    ) -> std::result::Result<InstanceRecord, CloudError> {
        self.records
            .lock()
            .unwrap()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(instance_id.to_string()))
    }
}

#[async_trait]
impl InstanceConnectApi for MockCloud {
    async fn send_ssh_public_key(
        &self,
        request: SendSshPublicKey,
    ) -> std::result::Result<(), CloudError> {
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        if !self.records.lock().unwrap().contains_key(&request.instance_id) {
            return Err(CloudError::NotFound(request.instance_id));
        }
        self.registrations.lock().unwrap().push(Registration {
            instance_id: request.instance_id,
            availability_zone: request.availability_zone,
            os_user: request.os_user,
            public_key: request.public_key,
            at: self.clock.now(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Dial { host: String, port: u16 },
    Proxied { via: String, host: String, port: u16 },
    Handshake { host: String, port: u16 },
    Auth { host: String, user: String, algorithm: String, accepted: bool },
    Shell { host: String },
}

struct NetState {
    cloud: Arc<MockCloud>,
    clock: Arc<MockClock>,
    events: Mutex<Vec<Event>>,
    routes: Mutex<HashMap<(String, u16), SocketAddr>>,
    pending_parents: Mutex<HashMap<(String, u16), Arc<MockSession>>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    reject_ed25519: Mutex<HashSet<String>>,
    fail_dial: Mutex<HashSet<String>>,
    fail_handshake: Mutex<HashSet<String>>,
    stall_handshake: Mutex<HashSet<String>>,
    handshake_delay: Mutex<ChronoDuration>,
}

impl NetState {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Simulated SSH network.
#[derive(Clone)]
pub struct MockTransport {
    net: Arc<NetState>,
}

impl MockTransport {
    pub fn new(cloud: Arc<MockCloud>, clock: Arc<MockClock>) -> Self {
        Self {
            net: Arc::new(NetState {
                cloud,
                clock,
                events: Mutex::new(Vec::new()),
                routes: Mutex::new(HashMap::new()),
                pending_parents: Mutex::new(HashMap::new()),
                sessions: Mutex::new(Vec::new()),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                reject_ed25519: Mutex::new(HashSet::new()),
                fail_dial: Mutex::new(HashSet::new()),
                fail_handshake: Mutex::new(HashSet::new()),
                stall_handshake: Mutex::new(HashSet::new()),
                handshake_delay: Mutex::new(ChronoDuration::zero()),
            }),
        }
    }

    /// Proxied streams to `host:port` reach `addr` on this machine.
    pub fn route(&self, host: &str, port: u16, addr: SocketAddr) {
        self.net
            .routes
            .lock()
            .unwrap()
            .insert((host.to_string(), port), addr);
    }

    pub fn reject_ed25519(&self, host: &str) {
        self.net.reject_ed25519.lock().unwrap().insert(host.to_string());
    }

    pub fn fail_dial(&self, host: &str) {
        self.net.fail_dial.lock().unwrap().insert(host.to_string());
    }

    pub fn fail_handshake(&self, host: &str) {
        self.net.fail_handshake.lock().unwrap().insert(host.to_string());
    }

    /// Handshakes with `host` never complete.
    pub fn stall_handshake(&self, host: &str) {
        self.net.stall_handshake.lock().unwrap().insert(host.to_string());
    }

    /// Advance the mock clock by `delay` during every handshake.
    pub fn slow_handshake(&self, delay: ChronoDuration) {
        *self.net.handshake_delay.lock().unwrap() = delay;
    }

    pub fn events(&self) -> Vec<Event> {
        self.net.events.lock().unwrap().clone()
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.net.sessions.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.net.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.net.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream> {
        self.net.record(Event::Dial {
            host: host.to_string(),
            port,
        });
        if self.net.fail_dial.lock().unwrap().contains(host) {
            return Err(Error::connection_failed(
                format!("{host}:{port}"),
                "connection refused",
            ));
        }
        let (stream, _peer) = tokio::io::duplex(64);
        Ok(Box::new(stream))
    }

    async fn handshake(
        &self,
        _stream: BoxedStream,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn PendingSession>> {
        self.net.record(Event::Handshake {
            host: host.to_string(),
            port,
        });
        if self.net.fail_handshake.lock().unwrap().contains(host) {
            return Err(Error::HandshakeFailed(format!("{host}:{port}: no common kex")));
        }
        let stalled = self.net.stall_handshake.lock().unwrap().contains(host);
        if stalled {
            std::future::pending::<()>().await;
        }
        let delay = *self.net.handshake_delay.lock().unwrap();
        self.net.clock.advance(delay);

        let parent = self
            .net
            .pending_parents
            .lock()
            .unwrap()
            .remove(&(host.to_string(), port));
        Ok(Box::new(MockPending {
            net: Arc::clone(&self.net),
            host: host.to_string(),
            parent,
        }))
    }
}

struct MockPending {
    net: Arc<NetState>,
    host: String,
    parent: Option<Arc<MockSession>>,
}

#[async_trait]
impl PendingSession for MockPending {
    async fn authenticate(&mut self, user: &str, key: Arc<PrivateKey>) -> Result<bool> {
        let algorithm = key.algorithm();
        let accepted = !(algorithm == Algorithm::Ed25519
            && self.net.reject_ed25519.lock().unwrap().contains(&self.host))
            && self.net.cloud.is_authorized(&self.host, user, &key);
        self.net.record(Event::Auth {
            host: self.host.clone(),
            user: user.to_string(),
            algorithm: algorithm.as_str().to_string(),
            accepted,
        });
        Ok(accepted)
    }

    fn into_session(self: Box<Self>) -> Arc<dyn HopSession> {
        let session = Arc::new(MockSession {
            net: Arc::clone(&self.net),
            host: self.host,
            parent: self.parent,
            closed: AtomicBool::new(false),
        });
        self.net.opened.fetch_add(1, Ordering::SeqCst);
        self.net.sessions.lock().unwrap().push(Arc::clone(&session));
        session
    }

    async fn abandon(self: Box<Self>) {}
}

/// One simulated authenticated session.
pub struct MockSession {
    net: Arc<NetState>,
    host: String,
    parent: Option<Arc<MockSession>>,
    closed: AtomicBool,
}

impl MockSession {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Drop the transport without an orderly close, as a network failure would.
    pub fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl HopSession for MockSession {
    async fn open_proxied_stream(&self, host: &str, port: u16) -> Result<BoxedStream> {
        if self.is_closed() {
            return Err(Error::TransportLost(format!("session to {} is closed", self.host)));
        }
        self.net.record(Event::Proxied {
            via: self.host.clone(),
            host: host.to_string(),
            port,
        });

        let routed = self
            .net
            .routes
            .lock()
            .unwrap()
            .get(&(host.to_string(), port))
            .copied();
        if let Some(addr) = routed {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| Error::connection_failed(format!("{host}:{port}"), e))?;
            return Ok(Box::new(stream));
        }

        // Not a data destination: the next handshake rides on this session.
        let me = self
            .net
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| std::ptr::eq(s.as_ref(), self))
            .cloned();
        if let Some(me) = me {
            self.net
                .pending_parents
                .lock()
                .unwrap()
                .insert((host.to_string(), port), me);
        }
        let (stream, _peer) = tokio::io::duplex(64);
        Ok(Box::new(stream))
    }

    async fn open_shell(&self, _pty: &PtyRequest) -> Result<BoxedStream> {
        if self.is_closed() {
            return Err(Error::TransportLost(format!("session to {} is closed", self.host)));
        }
        self.net.record(Event::Shell {
            host: self.host.clone(),
        });
        let (local, remote) = tokio::io::duplex(1024);
        tokio::spawn(echo_shell(remote));
        Ok(Box::new(local))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.net.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            || self.parent.as_ref().map_or(false, |p| p.is_closed())
    }
}

/// Echo each line back until `exit`, then hang up.
async fn echo_shell(stream: tokio::io::DuplexStream) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim() == "exit" {
            break;
        }
        if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
            return;
        }
    }
    let _ = write.shutdown().await;
}

/// TCP echo server on an ephemeral loopback port.
pub async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
                let _ = write.shutdown().await;
            });
        }
    });
    addr
}

/// Everything a test needs, wired together.
pub struct Harness {
    pub clock: Arc<MockClock>,
    pub cloud: Arc<MockCloud>,
    pub transport: MockTransport,
}

impl Harness {
    pub fn new() -> Self {
        let clock = MockClock::new();
        let cloud = MockCloud::new(Arc::clone(&clock));
        let transport = MockTransport::new(Arc::clone(&cloud), Arc::clone(&clock));
        Self {
            clock,
            cloud,
            transport,
        }
    }

    pub fn connectivity(&self, config: HopConfig) -> Connectivity {
        Connectivity::new(
            Arc::new(self.transport.clone()),
            self.cloud.clone(),
            self.cloud.clone(),
            self.clock.clone(),
            config,
        )
    }
}

/// Config with fast liveness checks for tests.
pub fn test_config() -> HopConfig {
    let mut config = HopConfig::default();
    config.connection.connect_timeout = 5;
    config.tunnel.session_check_interval = 20;
    config.tunnel.drain_grace = 1;
    config
}
