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

//! Serving inbound requests and pushing observation notifications.

use crate::consts::{OBSERVE_DEREGISTER, OBSERVE_REGISTER};
use crate::dispatcher::RequestHandlerDispatcher;
use crate::message::{Message, MsgCode, MsgToken, MsgType};
use crate::messaging::MessageSender;
use crate::observe::Notifier;
use crate::response::RestResponse;

use log::{debug, info};

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::mpsc;

/// One registered observer of a resource.
///
/// The receiver is the engine's end of the notification channel; the
/// resource holds the sending [`Notifier`]. When the resource drops its
/// notifier the channel disconnects and the observation is removed on the
/// next loop tick.
struct Observation {
    msg_type: MsgType,
    rx: mpsc::Receiver<RestResponse>,
}

/// Server half of the messaging core: the dispatcher and the observation
/// table.
///
/// Observations are uniquely identified by the tuple `(endpoint, token)`.
pub(crate) struct ServerEngine {
    pub dispatcher: RequestHandlerDispatcher,
    observations: HashMap<(SocketAddrV4, u64), Observation>,
}

impl ServerEngine {
    pub fn new() -> ServerEngine {
        ServerEngine {
            dispatcher: RequestHandlerDispatcher::new(),
            observations: HashMap::new(),
        }
    }

    /// Handles one inbound request and sends whatever replies it requires.
    pub fn on_message(&mut self, request: &Message, from: SocketAddrV4, out: &dyn MessageSender) {
        debug!(
            "Received request {} from {} with {} bytes payload",
            request,
            from,
            request.payload().len()
        );

        if request.code().is_empty() {
            // Ping request gets ping response.
            if request.msg_type().is_con() {
                out.send_best_effort(from, Message::reset(request.msg_id()));
            }
            return;
        }

        let delayed = self.is_delayed(request);
        if request.msg_type().is_con() && delayed {
            // The response will follow as a separate confirmable message.
            out.send_best_effort(from, Message::empty_ack(request.msg_id()));
        }

        let response = self.on_request(request, from);

        let (reply_type, reply_id) = if request.msg_type().is_con() {
            if delayed {
                (MsgType::Con, out.next_msg_id())
            } else {
                // Piggybacked response, reusing the request's message id.
                (MsgType::Ack, request.msg_id())
            }
        } else {
            (MsgType::Non, out.next_msg_id())
        };

        let mut reply = Message::response(reply_type, reply_id, response.code(), request.token())
            .with_payload(response.payload().to_vec());
        if let Some(content_format) = response.content_format() {
            reply = reply.with_content_format(content_format);
        }
        out.send_best_effort(from, reply);
    }

    fn is_delayed(&self, request: &Message) -> bool {
        let path = request.path();
        match request.code() {
            MsgCode::MethodGet => match request.observe() {
                Some(OBSERVE_REGISTER) => self.dispatcher.is_observe_delayed(path),
                _ => self.dispatcher.is_get_delayed(path),
            },
            MsgCode::MethodPut => self.dispatcher.is_put_delayed(path),
            MsgCode::MethodPost => self.dispatcher.is_post_delayed(path),
            MsgCode::MethodDelete => self.dispatcher.is_delete_delayed(path),
            _ => false,
        }
    }

    fn on_request(&mut self, request: &Message, from: SocketAddrV4) -> RestResponse {
        let path = request.path();
        match request.code() {
            MsgCode::MethodGet => match request.observe() {
                Some(OBSERVE_REGISTER) => self.register_observer(request, from),
                Some(OBSERVE_DEREGISTER) => {
                    self.remove_observation(from, request.token());
                    self.dispatcher.get(path)
                }
                _ => self.dispatcher.get(path),
            },
            MsgCode::MethodPut => self.dispatcher.put(path, request.payload()),
            MsgCode::MethodPost => self.dispatcher.post(path, request.payload()),
            MsgCode::MethodDelete => self.dispatcher.delete(path),
            _ => {
                // We reply with bad request if we receive an unknown request code.
                RestResponse::default().with_code(MsgCode::ClientErrorBadRequest)
            }
        }
    }

    /// Registers an observation and returns the immediate reply, which is
    /// the OBSERVE handler's return value.
    fn register_observer(&mut self, request: &Message, from: SocketAddrV4) -> RestResponse {
        let (notifier, rx) = Notifier::new();
        let response = self.dispatcher.observe(request.path(), notifier);

        if response.code().is_error() {
            return response;
        }

        info!(
            "Observer {} registered on {} with token {}",
            from,
            request.path(),
            request.token()
        );
        self.observations.insert(
            (from, request.token().value()),
            Observation {
                msg_type: request.msg_type(),
                rx,
            },
        );
        response
    }

    /// Cancels the observation held by `from` under `token`, if any.
    ///
    /// Called for explicit deregistrations, for resets from the observer,
    /// and when a confirmable notification exhausts its retransmissions.
    pub fn on_peer_reset(&mut self, from: SocketAddrV4, token: MsgToken) {
        self.remove_observation(from, token);
    }

    fn remove_observation(&mut self, from: SocketAddrV4, token: MsgToken) {
        if self.observations.remove(&(from, token.value())).is_some() {
            info!("Observation of {} with token {} removed", from, token);
        }
    }

    /// Forwards queued resource updates to their observers.
    ///
    /// Notifications mirror the transport type of the original request, so a
    /// confirmable registration yields confirmable notifications (which the
    /// retransmission layer then tracks).
    pub fn drain_notifications(&mut self, out: &dyn MessageSender) {
        let mut closed = Vec::new();

        for ((from, token), observation) in self.observations.iter() {
            loop {
                match observation.rx.try_recv() {
                    Ok(response) => {
                        let mut notification = Message::response(
                            observation.msg_type,
                            out.next_msg_id(),
                            response.code(),
                            MsgToken(*token),
                        )
                        .with_payload(response.payload().to_vec());
                        if let Some(content_format) = response.content_format() {
                            notification = notification.with_content_format(content_format);
                        }
                        out.send_best_effort(*from, notification);
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        closed.push((*from, *token));
                        break;
                    }
                }
            }
        }

        for key in closed {
            info!(
                "Resource for observer {} with token {} went away",
                key.0,
                MsgToken(key.1)
            );
            self.observations.remove(&key);
        }
    }

    #[cfg(test)]
    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }
}
