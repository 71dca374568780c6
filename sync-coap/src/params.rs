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

//! [CoAP transmission parameters][tp].
//!
//! [tp]: https://tools.ietf.org/html/rfc7252#section-4.8

use std::time::{Duration, Instant};

/// Base timeout for the first retransmission of a confirmable message.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on the randomization of the first backoff interval.
///
/// This library uses the deterministic lower bound (a factor of 1.0) when
/// scheduling retransmissions, which stays within the bound required by
/// RFC 7252.
pub const ACK_RANDOM_FACTOR: f32 = 1.5;

/// Maximum number of retransmissions of a single confirmable message.
pub const MAX_RETRANSMITS: u32 = 4;

/// Maximum number of simultaneous outstanding confirmable exchanges per peer.
pub const NSTART: u32 = 1;

/// Maximum time a server may leisurely delay responding to a multicast request.
pub const DEFAULT_LEISURE: Duration = Duration::from_secs(5);

/// CoAP probing rate, measured in bytes per second.
pub const PROBING_RATE: u32 = 1;

/// How long a single receive call may block the event loop. One loop tick.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Returns the instant at which the next retransmission of a confirmable
/// message is due, given the time of the initial transmission and the number
/// of retransmissions already performed.
///
/// The schedule is the doubling-interval sequence `(2^(k+1) - 1) * ACK_TIMEOUT`
/// after the initial send, so retransmissions happen 1s, 3s, 7s, 15s, ... after
/// the first attempt.
pub fn retransmit_deadline(first_sent: Instant, retransmits: u32) -> Instant {
    let factor = (1u32 << (retransmits + 1)) - 1;
    first_sent + ACK_TIMEOUT * factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retransmit_schedule() {
        let t0 = Instant::now();

        assert_eq!(retransmit_deadline(t0, 0), t0 + Duration::from_secs(1));
        assert_eq!(retransmit_deadline(t0, 1), t0 + Duration::from_secs(3));
        assert_eq!(retransmit_deadline(t0, 2), t0 + Duration::from_secs(7));
        assert_eq!(retransmit_deadline(t0, 3), t0 + Duration::from_secs(15));
        assert_eq!(retransmit_deadline(t0, 4), t0 + Duration::from_secs(31));
    }
}
