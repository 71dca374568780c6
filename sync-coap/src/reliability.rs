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

//! Retransmission tracking for confirmable messages.

use crate::message::{Message, MsgId};
use crate::params;

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::time::Instant;

/// One unacknowledged confirmable message.
#[derive(Debug, Clone)]
pub(crate) struct UnackEntry {
    pub dest: SocketAddrV4,
    pub message: Message,
    pub first_sent: Instant,
    pub retransmits: u32,
}

/// Table of confirmable messages awaiting acknowledgement, keyed by
/// message id. At most one entry exists per message id.
#[derive(Debug, Default)]
pub(crate) struct UnackTable {
    entries: HashMap<MsgId, UnackEntry>,
}

impl UnackTable {
    /// Starts tracking a freshly sent confirmable message.
    ///
    /// Retransmissions keep their original entry, so re-registering an id
    /// that is already tracked leaves the existing entry alone.
    pub fn register(&mut self, dest: SocketAddrV4, message: Message, now: Instant) {
        self.entries.entry(message.msg_id()).or_insert(UnackEntry {
            dest,
            message,
            first_sent: now,
            retransmits: 0,
        });
    }

    /// Stops tracking the given message id, returning its entry if one
    /// existed.
    pub fn acknowledge(&mut self, msg_id: MsgId) -> Option<UnackEntry> {
        self.entries.remove(&msg_id)
    }

    /// Returns the number of tracked messages.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Advances the retransmission schedule to `now`.
    ///
    /// Entries whose deadline has passed are either scheduled for one more
    /// resend (first return value) or, once `MAX_RETRANSMITS` resends have
    /// gone unanswered, removed and returned as expired (second return
    /// value).
    pub fn due(&mut self, now: Instant) -> (Vec<(SocketAddrV4, Message)>, Vec<UnackEntry>) {
        let mut resends = Vec::new();
        let mut expired_ids = Vec::new();

        for (msg_id, entry) in self.entries.iter_mut() {
            if now < params::retransmit_deadline(entry.first_sent, entry.retransmits) {
                continue;
            }
            if entry.retransmits < params::MAX_RETRANSMITS {
                entry.retransmits += 1;
                resends.push((entry.dest, entry.message.clone()));
            } else {
                expired_ids.push(*msg_id);
            }
        }

        let expired = expired_ids
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect();

        (resends, expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MsgCode, MsgToken, MsgType};
    use std::time::Duration;

    fn entry_msg(msg_id: MsgId) -> Message {
        Message::request(MsgType::Con, msg_id, MsgCode::MethodGet, MsgToken(1), "/x").unwrap()
    }

    fn dest() -> SocketAddrV4 {
        "127.0.0.1:5683".parse().unwrap()
    }

    #[test]
    fn resend_schedule() {
        let mut table = UnackTable::default();
        let t0 = Instant::now();
        table.register(dest(), entry_msg(7), t0);

        // Nothing is due before the first deadline.
        let (resends, expired) = table.due(t0 + Duration::from_millis(999));
        assert!(resends.is_empty() && expired.is_empty());

        // First resend at 1s, second at 3s.
        let (resends, expired) = table.due(t0 + Duration::from_secs(1));
        assert_eq!(resends.len(), 1);
        assert!(expired.is_empty());

        let (resends, _) = table.due(t0 + Duration::from_secs(2));
        assert!(resends.is_empty());

        let (resends, _) = table.due(t0 + Duration::from_secs(3));
        assert_eq!(resends.len(), 1);
    }

    #[test]
    fn expires_after_max_retransmits() {
        let mut table = UnackTable::default();
        let t0 = Instant::now();
        table.register(dest(), entry_msg(7), t0);

        let mut total_resends = 0;
        for s in 0..31 {
            let (resends, expired) = table.due(t0 + Duration::from_secs(s));
            total_resends += resends.len();
            assert!(expired.is_empty());
        }

        assert_eq!(total_resends, params::MAX_RETRANSMITS as usize);

        // The 31 second mark is (2^5 - 1) * ACK_TIMEOUT: the entry expires.
        let (resends, expired) = table.due(t0 + Duration::from_secs(31));
        assert!(resends.is_empty());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].message.msg_id(), 7);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn acknowledge_removes_entry() {
        let mut table = UnackTable::default();
        let t0 = Instant::now();
        table.register(dest(), entry_msg(7), t0);

        assert!(table.acknowledge(7).is_some());
        assert!(table.acknowledge(7).is_none());

        let (resends, expired) = table.due(t0 + Duration::from_secs(60));
        assert!(resends.is_empty() && expired.is_empty());
    }

    #[test]
    fn retransmit_keeps_message_id() {
        let mut table = UnackTable::default();
        let t0 = Instant::now();
        table.register(dest(), entry_msg(42), t0);

        let (resends, _) = table.due(t0 + Duration::from_secs(1));
        assert_eq!(resends[0].1.msg_id(), 42);
        assert_eq!(resends[0].1.token(), MsgToken(1));
    }
}
