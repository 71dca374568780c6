// Copyright 2019 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The messaging core: one UDP endpoint serving as client and server.

use crate::client::{Client, ClientEngine, MulticastClient, PendingKind};
use crate::consts::ALL_COAP_NODES_V4;
use crate::dispatcher::RequestHandlerDispatcher;
use crate::error::Error;
use crate::message::{Message, MsgCode, MsgId, MsgType};
use crate::params;
use crate::reliability::UnackTable;
use crate::response::RestResponse;
use crate::server::ServerEngine;
use crate::transport::{Datagram, Transport, UdpTransport};

use log::{debug, error, info, warn};

use std::net::{SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

/// Time source for the event loop, injectable so tests can run on a virtual
/// clock.
pub type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

/// Internal interface the engines use to emit messages.
pub(crate) trait MessageSender {
    /// Allocates the next message id.
    fn next_msg_id(&self) -> MsgId;

    /// Sends a message, logging rather than propagating transport errors.
    fn send_best_effort(&self, dest: SocketAddrV4, msg: Message);
}

/// The CoAP messaging core.
///
/// A `Messaging` instance owns one [`Transport`] and drives both the client
/// and the server side of the protocol over it with a single event loop:
///
/// ```no_run
/// use sync_coap::{Messaging, MsgCode, RestResponse};
/// use std::time::Duration;
///
/// let mut messaging = Messaging::new(5683).unwrap();
///
/// messaging.request_handler().on_uri("/name").on_get(|_| {
///     RestResponse::default()
///         .with_code(MsgCode::SuccessContent)
///         .with_payload("gateway")
/// });
///
/// messaging.loop_start();
///
/// let client = messaging.get_client_for("localhost", 5683).unwrap();
/// let response = client.get("/name", true).unwrap();
/// println!("{}", response.wait(Duration::from_secs(5)).unwrap().payload_str());
///
/// messaging.loop_stop();
/// ```
pub struct Messaging {
    inner: Arc<MessagingInner>,
    worker: Option<thread::JoinHandle<()>>,
}

pub(crate) struct MessagingInner {
    transport: Arc<dyn Transport>,
    clock: Clock,
    next_msg_id: AtomicU16,
    unacked: Mutex<UnackTable>,
    client: ClientEngine,
    server: Mutex<ServerEngine>,
    terminate: AtomicBool,
}

impl Messaging {
    /// Creates a messaging core bound to the given UDP port.
    pub fn new(port: u16) -> Result<Messaging, Error> {
        let transport = UdpTransport::bind(port)?;
        Ok(Messaging::with_transport(
            Arc::new(transport),
            Arc::new(Instant::now),
        ))
    }

    /// Creates a messaging core on top of an externally provided transport
    /// and time source. This is how tests inject mock transports and virtual
    /// clocks.
    pub fn with_transport(transport: Arc<dyn Transport>, clock: Clock) -> Messaging {
        Messaging {
            inner: Arc::new(MessagingInner {
                transport,
                clock,
                next_msg_id: AtomicU16::new(rand::random()),
                unacked: Mutex::new(UnackTable::default()),
                client: ClientEngine::new(),
                server: Mutex::new(ServerEngine::new()),
                terminate: AtomicBool::new(false),
            }),
            worker: None,
        }
    }

    /// Performs a single iteration of the event loop: advances the
    /// retransmission schedule, forwards pending observation notifications,
    /// and waits up to the receive tick for one inbound datagram.
    ///
    /// Call this repeatedly when driving the loop from an external scheduler;
    /// otherwise use [`Messaging::loop_start`].
    pub fn loop_once(&self) {
        self.inner.loop_once();
    }

    /// Spawns the worker thread that runs the event loop until
    /// [`Messaging::loop_stop`] is called.
    pub fn loop_start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        self.inner.terminate.store(false, Ordering::Relaxed);
        let inner = self.inner.clone();
        let worker = thread::Builder::new()
            .name("sync-coap-loop".to_string())
            .spawn(move || {
                while !inner.terminate.load(Ordering::Relaxed) {
                    inner.loop_once();
                }
            })
            .expect("spawning event loop thread failed");
        self.worker = Some(worker);
    }

    /// Stops the worker thread started by [`Messaging::loop_start`] and
    /// waits for it to finish its current iteration.
    pub fn loop_stop(&mut self) {
        self.inner.terminate.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Returns mutable access to the dispatcher for registering resource
    /// handlers. Intended for configuration before the loop starts.
    pub fn request_handler(&self) -> DispatcherGuard<'_> {
        DispatcherGuard {
            guard: self.inner.server.lock().expect("lock failure"),
        }
    }

    /// Resolves `server_host` and returns a client handle bound to that
    /// destination. IPv4 only.
    pub fn get_client_for(&self, server_host: &str, server_port: u16) -> Result<Client, Error> {
        let dest = (server_host, server_port)
            .to_socket_addrs()
            .map_err(|_| Error::HostNotFound)?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(_) => None,
            })
            .ok_or(Error::HostNotFound)?;
        Ok(Client::new(self.inner.clone(), dest))
    }

    /// Returns a client handle that sends group requests to the CoAP "All
    /// Nodes" multicast address on the given port.
    pub fn get_multicast_client(&self, server_port: u16) -> MulticastClient {
        MulticastClient::new(
            self.inner.clone(),
            SocketAddrV4::new(ALL_COAP_NODES_V4, server_port),
        )
    }
}

impl Drop for Messaging {
    fn drop(&mut self) {
        self.loop_stop();
    }
}

/// Mutable access to the dispatcher, held for the duration of the
/// configuration statement.
pub struct DispatcherGuard<'a> {
    guard: MutexGuard<'a, ServerEngine>,
}

impl<'a> Deref for DispatcherGuard<'a> {
    type Target = RequestHandlerDispatcher;

    fn deref(&self) -> &RequestHandlerDispatcher {
        &self.guard.dispatcher
    }
}

impl<'a> DerefMut for DispatcherGuard<'a> {
    fn deref_mut(&mut self) -> &mut RequestHandlerDispatcher {
        &mut self.guard.dispatcher
    }
}

impl MessagingInner {
    pub(crate) fn client(&self) -> &ClientEngine {
        &self.client
    }

    pub(crate) fn next_msg_id(&self) -> MsgId {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends one message, registering confirmable messages with the
    /// retransmission layer first.
    pub(crate) fn send_message(&self, dest: SocketAddrV4, msg: &Message) -> Result<(), Error> {
        if msg.msg_type().is_con() {
            self.unacked
                .lock()
                .expect("lock failure")
                .register(dest, msg.clone(), (self.clock)());
        }

        let result = self.transport.send(dest, &msg.to_bytes());
        if result.is_err() && msg.msg_type().is_con() {
            self.unacked
                .lock()
                .expect("lock failure")
                .acknowledge(msg.msg_id());
        }
        result
    }

    /// Registers a pending request and sends its message. Issuance fails
    /// without leaving a pending entry behind if the send fails.
    pub(crate) fn send_request(
        &self,
        dest: SocketAddrV4,
        msg: Message,
        kind: PendingKind,
    ) -> Result<mpsc::Receiver<RestResponse>, Error> {
        let rx = self.client.register(msg.token(), kind)?;
        if let Err(e) = self.send_message(dest, &msg) {
            self.client.remove(msg.token());
            return Err(e);
        }
        Ok(rx)
    }

    fn loop_once(&self) {
        self.resend_unacknowledged();
        self.server
            .lock()
            .expect("lock failure")
            .drain_notifications(self);

        match self.transport.recv(params::RECV_TIMEOUT) {
            Ok(Some(datagram)) => self.on_datagram(datagram),
            Ok(None) => {}
            Err(e) => warn!("Receive failed: {}", e),
        }
    }

    fn on_datagram(&self, datagram: Datagram) {
        match Message::from_bytes(&datagram.payload) {
            Ok(msg) => {
                debug!("Received {} from {}", msg, datagram.source);
                self.on_message(&msg, datagram.source);
            }
            Err(e) => {
                warn!(
                    "Dropping malformed datagram ({} bytes) from {}: {}",
                    datagram.payload.len(),
                    datagram.source,
                    e
                );
            }
        }
    }

    /// Classifies one inbound message and routes it to the engines.
    fn on_message(&self, msg: &Message, from: SocketAddrV4) {
        match msg.msg_type() {
            MsgType::Res => {
                let entry = self
                    .unacked
                    .lock()
                    .expect("lock failure")
                    .acknowledge(msg.msg_id());
                // An empty reset identifies the exchange by message id only;
                // recover the token from the cleared entry.
                let token = match &entry {
                    Some(entry) => entry.message.token(),
                    None => msg.token(),
                };
                debug!("Received reset for msgid={:04X}", msg.msg_id());
                self.client.on_reset(token);
                self.server
                    .lock()
                    .expect("lock failure")
                    .on_peer_reset(from, token);
            }

            MsgType::Ack => {
                if self
                    .unacked
                    .lock()
                    .expect("lock failure")
                    .acknowledge(msg.msg_id())
                    .is_none()
                {
                    warn!(
                        "Received unexpected acknowledgement with msgid={:04X}",
                        msg.msg_id()
                    );
                }
                if msg.code().is_empty() {
                    // Pure transport-layer acknowledgement; the response
                    // follows separately.
                    return;
                }
                if msg.code().is_request() {
                    error!("Received acknowledgement with request code {}", msg.code());
                    return;
                }
                // Piggybacked response.
                self.client.on_response(msg, from);
            }

            MsgType::Con | MsgType::Non => {
                if msg.code().is_response() {
                    if msg.msg_type().is_con() {
                        debug!(
                            "Acknowledging confirmable response with msgid={:04X}",
                            msg.msg_id()
                        );
                        if let Err(e) = self.send_message(from, &Message::empty_ack(msg.msg_id())) {
                            error!("Sending acknowledgement to {} failed: {}", from, e);
                        }
                    }
                    self.client.on_response(msg, from);
                } else {
                    self.server
                        .lock()
                        .expect("lock failure")
                        .on_message(msg, from, self);
                }
            }
        }
    }

    fn resend_unacknowledged(&self) {
        let now = (self.clock)();
        let (resends, expired) = self.unacked.lock().expect("lock failure").due(now);

        for (dest, message) in resends {
            info!(
                "Resending confirmable message with msgid={:04X}",
                message.msg_id()
            );
            if let Err(e) = self.transport.send(dest, &message.to_bytes()) {
                error!("Resending to {} failed: {}", dest, e);
            }
        }

        for entry in expired {
            info!(
                "Confirmable message with msgid={:04X} expired",
                entry.message.msg_id()
            );
            // Complete the waiting request with a synthetic 5.03 carrying
            // the original token, delivered through the regular inbound path.
            let giveup = Message::response(
                MsgType::Ack,
                entry.message.msg_id(),
                MsgCode::ServerErrorServiceUnavailable,
                entry.message.token(),
            );
            self.on_message(&giveup, entry.dest);
            // An expired notification means the observer is gone.
            self.server
                .lock()
                .expect("lock failure")
                .on_peer_reset(entry.dest, entry.message.token());
        }
    }
}

impl MessageSender for MessagingInner {
    fn next_msg_id(&self) -> MsgId {
        MessagingInner::next_msg_id(self)
    }

    fn send_best_effort(&self, dest: SocketAddrV4, msg: Message) {
        debug!("Sending {} to {}", msg, dest);
        if let Err(e) = self.send_message(dest, &msg) {
            error!("Sending to {} failed: {}", dest, e);
        }
    }
}
