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

//! A compact, synchronous implementation of the Constrained Application
//! Protocol (CoAP, [RFC 7252](https://tools.ietf.org/html/rfc7252)).
//!
//! This library drives one UDP endpoint as both CoAP client and CoAP server
//! from a single event loop. It covers the message codec with its
//! delta-encoded options, confirmable-message retransmission with
//! exponential backoff, request/response correlation by token, resource
//! observation ([RFC 7641](https://tools.ietf.org/html/rfc7641) subscribe
//! and cancel), and URI-pattern request dispatch.
//!
//! Unlike async CoAP stacks, everything here is plain threads and channels:
//! requests return futures and streams backed by `std::sync::mpsc`, and the
//! event loop is a loop you can either run on a worker thread
//! ([`Messaging::loop_start`]) or drive yourself one tick at a time
//! ([`Messaging::loop_once`]).
//!
//! ## Serving resources
//!
//! ```no_run
//! use sync_coap::{Messaging, MsgCode, RestResponse};
//!
//! let mut messaging = Messaging::new(5683).unwrap();
//!
//! messaging
//!     .request_handler()
//!     .on_uri("/name")
//!         .on_get(|_path| {
//!             RestResponse::default()
//!                 .with_code(MsgCode::SuccessContent)
//!                 .with_payload("coap_server")
//!         })
//!     .on_uri("/dynamic/?")
//!         .on_delete(|_path| {
//!             RestResponse::default().with_code(MsgCode::SuccessDeleted)
//!         });
//!
//! messaging.loop_start();
//! ```
//!
//! ## Sending requests
//!
//! ```no_run
//! use sync_coap::Messaging;
//! use std::time::Duration;
//!
//! let mut messaging = Messaging::new(0).unwrap();
//! messaging.loop_start();
//!
//! let client = messaging.get_client_for("coap.me", 5683).unwrap();
//! let future = client.get("/test", true).unwrap();
//! let response = future.wait(Duration::from_secs(10)).unwrap();
//! println!("{}: {}", response.code(), response.payload_str());
//! ```
//!
//! Transport security (`coaps:`), blockwise transfer, and proxying are out
//! of scope.

pub mod consts;
pub mod message;
pub mod option;
pub mod params;

mod client;
mod dispatcher;
mod error;
mod messaging;
mod mock;
mod observe;
mod path;
mod reliability;
mod response;
mod server;
mod transport;
mod uri;
mod util;

pub use client::{Client, MulticastClient, ResponseFuture, ResponseStream};
pub use dispatcher::{HandlerBuilder, RequestHandler, RequestHandlerDispatcher};
pub use error::Error;
pub use message::{Message, MsgCode, MsgCodeClass, MsgId, MsgToken, MsgType};
pub use messaging::{Clock, DispatcherGuard, Messaging};
pub use mock::{MockTransport, VirtualClock};
pub use observe::Notifier;
pub use path::{Path, PathPattern};
pub use response::RestResponse;
pub use transport::{Datagram, Transport, UdpTransport};
pub use uri::CoapUri;
