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

//! Datagram transport abstraction and the UDP implementation.

use crate::consts::ALL_COAP_NODES_V4;
use crate::error::Error;

use log::warn;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

/// A single datagram received from the network, along with its origin.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Datagram {
    /// Endpoint the datagram was received from.
    pub source: SocketAddrV4,

    /// The raw datagram bytes.
    pub payload: Vec<u8>,
}

/// Interface to a datagram transport shared by the messaging event loop and
/// tests.
///
/// Implementations must be safe to share across threads; the engine holds the
/// transport behind an `Arc`.
pub trait Transport: Send + Sync {
    /// Sends one datagram to the given endpoint.
    fn send(&self, dest: SocketAddrV4, data: &[u8]) -> Result<(), Error>;

    /// Waits for and reads one datagram from the network.
    ///
    /// Returns `Ok(None)` if nothing was received before the timeout.
    fn recv(&self, timeout: Duration) -> Result<Option<Datagram>, Error>;
}

/// UDP implementation of [`Transport`].
///
/// The socket joins the CoAP "All Nodes" multicast group 224.0.1.187 with
/// multicast loopback enabled, so a single endpoint can serve both unicast
/// and multicast requests. IPv4 only.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Opens a UDP transport bound to the given local port (0 picks an
    /// ephemeral port).
    pub fn bind(port: u16) -> Result<UdpTransport, Error> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;

        socket.set_multicast_loop_v4(true)?;
        if let Err(e) = socket.join_multicast_v4(&ALL_COAP_NODES_V4, &Ipv4Addr::UNSPECIFIED) {
            // Multicast is optional; unicast operation still works without it.
            warn!("Joining multicast group failed: {}", e);
        }

        Ok(UdpTransport { socket })
    }

    /// Returns the local port the transport is bound to.
    pub fn local_port(&self) -> Result<u16, Error> {
        Ok(self.socket.local_addr()?.port())
    }
}

impl Transport for UdpTransport {
    fn send(&self, dest: SocketAddrV4, data: &[u8]) -> Result<(), Error> {
        let sent = self.socket.send_to(data, dest)?;
        if sent != data.len() {
            return Err(Error::IOError);
        }
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Datagram>, Error> {
        self.socket.set_read_timeout(Some(timeout))?;

        let mut buffer = [0u8; 2048];
        match self.socket.recv_from(&mut buffer) {
            Ok((len, SocketAddr::V4(source))) => Ok(Some(Datagram {
                source,
                payload: buffer[..len].to_vec(),
            })),
            Ok((_, SocketAddr::V6(source))) => {
                warn!("Dropping datagram from IPv6 source {}", source);
                Ok(None)
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
