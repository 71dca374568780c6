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

//! Scriptable transport and clock back-ends for testing.

use crate::error::Error;
use crate::messaging::Clock;
use crate::transport::{Datagram, Transport};

use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// In-memory [`Transport`] whose traffic is scripted by the test.
///
/// Inbound datagrams are queued with [`MockTransport::push_inbound`] and
/// handed to the event loop one per receive call; everything the engine
/// sends is captured for inspection via [`MockTransport::take_outbound`].
#[derive(Debug, Default)]
pub struct MockTransport {
    inbound: Mutex<VecDeque<Datagram>>,
    outbound: Mutex<Vec<(SocketAddrV4, Vec<u8>)>>,
}

impl MockTransport {
    /// Creates a new mock transport behind an `Arc`, ready to be handed to
    /// [`Messaging::with_transport`](crate::Messaging::with_transport).
    pub fn new() -> Arc<MockTransport> {
        Arc::new(MockTransport::default())
    }

    /// Queues one datagram for the engine to receive.
    pub fn push_inbound(&self, source: SocketAddrV4, payload: Vec<u8>) {
        self.inbound
            .lock()
            .expect("lock failure")
            .push_back(Datagram { source, payload });
    }

    /// Drains and returns everything sent since the last call.
    pub fn take_outbound(&self) -> Vec<(SocketAddrV4, Vec<u8>)> {
        std::mem::replace(&mut *self.outbound.lock().expect("lock failure"), Vec::new())
    }
}

impl Transport for MockTransport {
    fn send(&self, dest: SocketAddrV4, data: &[u8]) -> Result<(), Error> {
        self.outbound
            .lock()
            .expect("lock failure")
            .push((dest, data.to_vec()));
        Ok(())
    }

    fn recv(&self, _timeout: Duration) -> Result<Option<Datagram>, Error> {
        // Never blocks; tests drive the loop one tick at a time.
        Ok(self.inbound.lock().expect("lock failure").pop_front())
    }
}

/// Manually advanced time source for testing retransmission schedules.
#[derive(Debug)]
pub struct VirtualClock {
    now: Mutex<Instant>,
}

impl VirtualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Arc<VirtualClock> {
        Arc::new(VirtualClock {
            now: Mutex::new(Instant::now()),
        })
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock().expect("lock failure") += by;
    }

    /// Returns a [`Clock`] view of this virtual clock.
    pub fn as_clock(self: Arc<VirtualClock>) -> Clock {
        Arc::new(move || *self.now.lock().expect("lock failure"))
    }
}
