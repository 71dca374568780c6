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

//! Issuing requests and correlating their responses by token.

use crate::consts::OBSERVE_REGISTER;
use crate::error::Error;
use crate::message::{Message, MsgCode, MsgToken, MsgType};
use crate::messaging::MessagingInner;
use crate::response::RestResponse;

use log::{debug, info, warn};

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::time::Duration;

/// What a pending request does with responses after the first one.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum PendingKind {
    /// Resolved by the first matching response.
    Single,

    /// Remains pending and surfaces every matching response.
    Stream,
}

struct PendingRequest {
    kind: PendingKind,
    tx: mpsc::Sender<RestResponse>,
}

type PendingTable = HashMap<u64, PendingRequest>;

/// Client half of the messaging core: the pending-request table and the
/// token allocator.
///
/// All entries are keyed by token. Responses arriving with a token that has
/// no entry are logged and dropped.
pub(crate) struct ClientEngine {
    pending: Arc<Mutex<PendingTable>>,
    next_token: AtomicU64,
}

impl ClientEngine {
    pub fn new() -> ClientEngine {
        ClientEngine {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Allocates the next request token.
    ///
    /// Tokens are a monotonically increasing counter starting at zero, which
    /// keeps them compact on the wire. This is fine on a trusted network but
    /// is trivially guessable; deployments facing adversarial peers need a
    /// random token source instead.
    pub fn next_token(&self) -> MsgToken {
        MsgToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Inserts a pending entry for the given token, returning the receiving
    /// end of its response channel.
    pub fn register(
        &self,
        token: MsgToken,
        kind: PendingKind,
    ) -> Result<mpsc::Receiver<RestResponse>, Error> {
        let (tx, rx) = mpsc::channel();
        let mut pending = self.pending.lock().expect("lock failure");
        if pending.contains_key(&token.value()) {
            return Err(Error::DuplicateToken);
        }
        pending.insert(token.value(), PendingRequest { kind, tx });
        Ok(rx)
    }

    /// Removes the pending entry for the given token, if any.
    pub fn remove(&self, token: MsgToken) {
        self.pending
            .lock()
            .expect("lock failure")
            .remove(&token.value());
    }

    /// Routes one inbound response to the request waiting on its token.
    pub fn on_response(&self, msg: &Message, from: SocketAddrV4) {
        let mut response = RestResponse::default()
            .with_code(msg.code())
            .with_payload(msg.payload().to_vec())
            .with_source(from);
        if let Some(content_format) = msg.content_format() {
            response = response.with_content_format(content_format);
        }

        let mut pending = self.pending.lock().expect("lock failure");
        match pending.get(&msg.token().value()) {
            None => {
                warn!(
                    "Dropping response with unexpected token {} from {}",
                    msg.token(),
                    from
                );
            }
            Some(entry) => {
                let delivered = entry.tx.send(response).is_ok();
                if entry.kind == PendingKind::Single || !delivered {
                    pending.remove(&msg.token().value());
                }
            }
        }
    }

    /// Handles a peer reset of one of our in-flight requests.
    ///
    /// A reset of a ping is the pong: single-response requests resolve with
    /// an empty code. Streams are simply cancelled.
    pub fn on_reset(&self, token: MsgToken) {
        let mut pending = self.pending.lock().expect("lock failure");
        if let Some(entry) = pending.remove(&token.value()) {
            info!("Request with token {} was reset by the peer", token);
            if entry.kind == PendingKind::Single {
                let _ = entry
                    .tx
                    .send(RestResponse::default().with_code(MsgCode::Empty));
            }
        }
    }

    fn pending_handle(&self) -> Weak<Mutex<PendingTable>> {
        Arc::downgrade(&self.pending)
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("lock failure").len()
    }
}

/// A single response, not yet arrived.
///
/// Resolved by the first response matching the request's token, which
/// includes the synthetic `5.03 Service Unavailable` the retransmission
/// layer delivers when a confirmable request finally times out.
#[derive(Debug)]
pub struct ResponseFuture {
    rx: mpsc::Receiver<RestResponse>,
}

impl ResponseFuture {
    /// Blocks until the response arrives or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<RestResponse, Error> {
        match self.rx.recv_timeout(timeout) {
            Ok(response) => Ok(response),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::ResponseTimeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Cancelled),
        }
    }

    /// Returns the response if it has already arrived.
    pub fn poll(&self) -> Option<RestResponse> {
        self.rx.try_recv().ok()
    }
}

/// A stream of responses to a single request, as produced by observation
/// and multicast requests.
///
/// Dropping the stream removes the pending entry, so responses arriving
/// afterwards are discarded.
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::Receiver<RestResponse>,
    token: MsgToken,
    pending: Weak<Mutex<PendingTable>>,
}

impl ResponseStream {
    /// Blocks until the next response arrives or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<RestResponse, Error> {
        match self.rx.recv_timeout(timeout) {
            Ok(response) => Ok(response),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::ResponseTimeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Cancelled),
        }
    }

    /// Returns the next response if one has already arrived.
    pub fn poll(&self) -> Option<RestResponse> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.upgrade() {
            pending
                .lock()
                .expect("lock failure")
                .remove(&self.token.value());
        }
    }
}

/// Handle for sending requests to one server endpoint.
///
/// Obtained from [`Messaging::get_client_for`](crate::Messaging::get_client_for).
/// Requests are issued immediately; each returns a future or stream that the
/// event loop resolves as responses arrive.
pub struct Client {
    inner: Arc<MessagingInner>,
    dest: SocketAddrV4,
}

impl Client {
    pub(crate) fn new(inner: Arc<MessagingInner>, dest: SocketAddrV4) -> Client {
        Client { inner, dest }
    }

    fn request_type(confirmable: bool) -> MsgType {
        if confirmable {
            MsgType::Con
        } else {
            MsgType::Non
        }
    }

    fn single(&self, msg: Message) -> Result<ResponseFuture, Error> {
        debug!("Sending {} to {}", msg, self.dest);
        let rx = self
            .inner
            .send_request(self.dest, msg, PendingKind::Single)?;
        Ok(ResponseFuture { rx })
    }

    fn stream(&self, msg: Message) -> Result<ResponseStream, Error> {
        debug!("Sending {} to {}", msg, self.dest);
        let token = msg.token();
        let rx = self
            .inner
            .send_request(self.dest, msg, PendingKind::Stream)?;
        Ok(ResponseStream {
            rx,
            token,
            pending: self.inner.client().pending_handle(),
        })
    }

    /// Sends a GET request to the server.
    pub fn get(&self, uri: &str, confirmable: bool) -> Result<ResponseFuture, Error> {
        self.single(Message::request(
            Self::request_type(confirmable),
            self.inner.next_msg_id(),
            MsgCode::MethodGet,
            self.inner.client().next_token(),
            uri,
        )?)
    }

    /// Sends a PUT request to the server.
    pub fn put(&self, uri: &str, payload: &[u8], confirmable: bool) -> Result<ResponseFuture, Error> {
        self.single(
            Message::request(
                Self::request_type(confirmable),
                self.inner.next_msg_id(),
                MsgCode::MethodPut,
                self.inner.client().next_token(),
                uri,
            )?
            .with_payload(payload.to_vec()),
        )
    }

    /// Sends a POST request to the server.
    pub fn post(
        &self,
        uri: &str,
        payload: &[u8],
        confirmable: bool,
    ) -> Result<ResponseFuture, Error> {
        self.single(
            Message::request(
                Self::request_type(confirmable),
                self.inner.next_msg_id(),
                MsgCode::MethodPost,
                self.inner.client().next_token(),
                uri,
            )?
            .with_payload(payload.to_vec()),
        )
    }

    /// Sends a DELETE request to the server.
    pub fn delete(&self, uri: &str, confirmable: bool) -> Result<ResponseFuture, Error> {
        self.single(Message::request(
            Self::request_type(confirmable),
            self.inner.next_msg_id(),
            MsgCode::MethodDelete,
            self.inner.client().next_token(),
            uri,
        )?)
    }

    /// Pings the server.
    ///
    /// The future resolves with an empty code when the peer answers the
    /// confirmable empty message with a reset.
    pub fn ping(&self) -> Result<ResponseFuture, Error> {
        self.single(Message::request(
            MsgType::Con,
            self.inner.next_msg_id(),
            MsgCode::Empty,
            self.inner.client().next_token(),
            "",
        )?)
    }

    /// Registers this client as an observer of the given resource.
    ///
    /// The returned stream first carries the registration reply and then one
    /// response per update the resource publishes. Dropping the stream stops
    /// delivery; no deregistration message is sent.
    pub fn observe(&self, uri: &str, confirmable: bool) -> Result<ResponseStream, Error> {
        self.stream(
            Message::request(
                Self::request_type(confirmable),
                self.inner.next_msg_id(),
                MsgCode::MethodGet,
                self.inner.client().next_token(),
                uri,
            )?
            .with_observe(OBSERVE_REGISTER),
        )
    }
}

/// Handle for sending group requests to all CoAP nodes on the link.
///
/// Obtained from
/// [`Messaging::get_multicast_client`](crate::Messaging::get_multicast_client).
pub struct MulticastClient {
    inner: Arc<MessagingInner>,
    dest: SocketAddrV4,
}

impl MulticastClient {
    pub(crate) fn new(inner: Arc<MessagingInner>, dest: SocketAddrV4) -> MulticastClient {
        MulticastClient { inner, dest }
    }

    /// Sends a nonconfirmable GET request to the multicast group.
    ///
    /// The stream carries one response per answering server, each tagged
    /// with the sender's endpoint.
    pub fn get(&self, uri: &str) -> Result<ResponseStream, Error> {
        let msg = Message::request(
            MsgType::Non,
            self.inner.next_msg_id(),
            MsgCode::MethodGet,
            self.inner.client().next_token(),
            uri,
        )?;
        debug!("Sending multicast {} to {}", msg, self.dest);
        let token = msg.token();
        let rx = self
            .inner
            .send_request(self.dest, msg, PendingKind::Stream)?;
        Ok(ResponseStream {
            rx,
            token,
            pending: self.inner.client().pending_handle(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_msg(token: u64) -> Message {
        Message::response(MsgType::Non, 1, MsgCode::SuccessContent, MsgToken(token))
            .with_payload(b"hi".to_vec())
    }

    fn from_addr() -> SocketAddrV4 {
        "10.0.0.1:5683".parse().unwrap()
    }

    #[test]
    fn single_resolves_once() {
        let engine = ClientEngine::new();
        let rx = engine.register(MsgToken(1), PendingKind::Single).unwrap();

        engine.on_response(&response_msg(1), from_addr());
        assert_eq!(rx.try_recv().unwrap().payload(), b"hi");
        assert_eq!(engine.pending_len(), 0);

        // A second response with the same token is dropped.
        engine.on_response(&response_msg(1), from_addr());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stream_stays_pending() {
        let engine = ClientEngine::new();
        let rx = engine.register(MsgToken(2), PendingKind::Stream).unwrap();

        engine.on_response(&response_msg(2), from_addr());
        engine.on_response(&response_msg(2), from_addr());

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert_eq!(engine.pending_len(), 1);
    }

    #[test]
    fn duplicate_token_rejected() {
        let engine = ClientEngine::new();
        let _rx = engine.register(MsgToken(3), PendingKind::Single).unwrap();

        assert!(match engine.register(MsgToken(3), PendingKind::Single) {
            Err(Error::DuplicateToken) => true,
            _ => false,
        });
    }

    #[test]
    fn responses_carry_source() {
        let engine = ClientEngine::new();
        let rx = engine.register(MsgToken(4), PendingKind::Single).unwrap();

        engine.on_response(&response_msg(4), from_addr());
        assert_eq!(rx.try_recv().unwrap().source(), Some(from_addr()));
    }

    #[test]
    fn reset_resolves_single_with_empty_code() {
        let engine = ClientEngine::new();
        let rx = engine.register(MsgToken(5), PendingKind::Single).unwrap();

        engine.on_reset(MsgToken(5));
        assert_eq!(rx.try_recv().unwrap().code(), MsgCode::Empty);
        assert_eq!(engine.pending_len(), 0);
    }

    #[test]
    fn dropped_receiver_clears_stream_entry() {
        let engine = ClientEngine::new();
        let rx = engine.register(MsgToken(6), PendingKind::Stream).unwrap();
        drop(rx);

        engine.on_response(&response_msg(6), from_addr());
        assert_eq!(engine.pending_len(), 0);
    }

    #[test]
    fn tokens_are_monotonic_from_zero() {
        let engine = ClientEngine::new();
        assert_eq!(engine.next_token(), MsgToken(0));
        assert_eq!(engine.next_token(), MsgToken(1));
        assert_eq!(engine.next_token(), MsgToken(2));
    }
}
