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

use crate::util::{encode_uint, uint_len};

/// Type for holding the value of a CoAP message token.
///
/// Tokens are modeled as 64-bit unsigned integers. On the wire they are
/// written big-endian with leading zero bytes trimmed, so a token of zero
/// occupies zero bytes (`TKL = 0`) and the all-ones token occupies eight.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, Ord, PartialOrd, Default)]
pub struct MsgToken(pub u64);

impl MsgToken {
    /// Constant representing an empty token.
    pub const EMPTY: MsgToken = MsgToken(0);

    /// Returns the token value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns the number of bytes this token occupies on the wire (0-8).
    pub fn wire_len(self) -> usize {
        uint_len(self.0)
    }

    /// Returns true if this is the empty token.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Writes this token into the given scratch buffer in trimmed big-endian
    /// form and returns the occupied prefix.
    pub fn encode(self, dst: &mut [u8; 8]) -> &[u8] {
        encode_uint(self.0, dst)
    }
}

impl std::fmt::Display for MsgToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut scratch = [0u8; 8];
        for b in encode_uint(self.0, &mut scratch) {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl core::convert::From<u64> for MsgToken {
    fn from(x: u64) -> Self {
        MsgToken(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_lengths() {
        assert_eq!(MsgToken(0).wire_len(), 0);
        assert_eq!(MsgToken(1).wire_len(), 1);
        assert_eq!(MsgToken(0xFF).wire_len(), 1);
        assert_eq!(MsgToken(0x100).wire_len(), 2);
        assert_eq!(MsgToken(u64::max_value()).wire_len(), 8);
    }
}
