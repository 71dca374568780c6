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

//! CoAP message representation and the UDP wire-format codec.
//!
//! The wire layout is the one from
//! [RFC 7252, Section 3](https://tools.ietf.org/html/rfc7252#section-3):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Token (TKL bytes) | Options (delta-encoded) |0xFF| Payload ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::error::Error;
use crate::option::{encode_option, OptionIterator, OptionNumber};
use crate::path::Path;
use crate::util::{encode_uint, try_decode_u16, try_decode_u32, try_decode_u64};

use log::{debug, warn};

mod msg_type;
pub use msg_type::*;

mod msg_code;
pub use msg_code::*;

mod token;
pub use token::*;

/// Type for a CoAP message id.
pub type MsgId = u16;

const COAP_VERSION: u8 = 1;
const MSG_VER_OFFS: u8 = 6;
const MSG_T_MASK: u8 = 0x30;
const MSG_T_OFFS: u8 = 4;
const MSG_TKL_MASK: u8 = 0x0F;
const PAYLOAD_MARKER: u8 = 0xFF;

/// An immutable CoAP message.
///
/// A `Message` is constructed either programmatically (via [`Message::request`]
/// and the `with_*` builder methods) or by parsing a datagram with
/// [`Message::from_bytes`]. Once constructed it never changes, so it can be
/// cheaply retained by the retransmission layer and resent byte-for-byte.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    msg_type: MsgType,
    msg_id: MsgId,
    code: MsgCode,
    token: MsgToken,
    path: Path,
    queries: Vec<String>,
    content_format: Option<u16>,
    observe: Option<u32>,
    payload: Vec<u8>,
}

impl Message {
    /// Creates a new request message for the given URI path.
    ///
    /// The path may carry a query part (`/users?min_age=18&max_age=39`);
    /// query segments are split on `&` and carried as separate `Uri-Query`
    /// options.
    pub fn request(
        msg_type: MsgType,
        msg_id: MsgId,
        code: MsgCode,
        token: MsgToken,
        uri: &str,
    ) -> Result<Message, Error> {
        let mut parts = uri.splitn(2, '?');
        let path = Path::new(parts.next().unwrap_or(""))?;
        let queries = parts
            .next()
            .map(|q| {
                q.split('&')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Message {
            msg_type,
            msg_id,
            code,
            token,
            path,
            queries,
            content_format: None,
            observe: None,
            payload: Vec::new(),
        })
    }

    /// Creates a new response message with an empty path.
    pub fn response(msg_type: MsgType, msg_id: MsgId, code: MsgCode, token: MsgToken) -> Message {
        Message {
            msg_type,
            msg_id,
            code,
            token,
            path: Path::empty(),
            queries: Vec::new(),
            content_format: None,
            observe: None,
            payload: Vec::new(),
        }
    }

    /// Creates an empty acknowledgement for the given message id.
    pub fn empty_ack(msg_id: MsgId) -> Message {
        Message::response(MsgType::Ack, msg_id, MsgCode::Empty, MsgToken::EMPTY)
    }

    /// Creates an empty reset message for the given message id.
    pub fn reset(msg_id: MsgId) -> Message {
        Message::response(MsgType::Res, msg_id, MsgCode::Empty, MsgToken::EMPTY)
    }

    /// Returns a copy of this message with the given payload.
    pub fn with_payload(mut self, payload: Vec<u8>) -> Message {
        self.payload = payload;
        self
    }

    /// Returns a copy of this message with the given content format.
    pub fn with_content_format(mut self, content_format: u16) -> Message {
        self.content_format = Some(content_format);
        self
    }

    /// Returns a copy of this message with the given observe value.
    pub fn with_observe(mut self, observe: u32) -> Message {
        self.observe = Some(observe);
        self
    }

    /// The message type.
    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    /// The message id.
    pub fn msg_id(&self) -> MsgId {
        self.msg_id
    }

    /// The message code.
    pub fn code(&self) -> MsgCode {
        self.code
    }

    /// The message token.
    pub fn token(&self) -> MsgToken {
        self.token
    }

    /// The URI path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The URI query segments, in the order they appear on the wire.
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// The content format, if one was set.
    pub fn content_format(&self) -> Option<u16> {
        self.content_format
    }

    /// The observe value, if one was set.
    pub fn observe(&self) -> Option<u32> {
        self.observe
    }

    /// The message payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serializes this message into its wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(32 + self.payload.len());
        let mut scratch = [0u8; 8];

        let tkl = self.token.wire_len() as u8;
        buffer.push((COAP_VERSION << MSG_VER_OFFS) | ((self.msg_type as u8) << MSG_T_OFFS) | tkl);
        buffer.push(self.code as u8);
        buffer.push((self.msg_id >> 8) as u8);
        buffer.push(self.msg_id as u8);

        buffer.extend_from_slice(self.token.encode(&mut scratch));

        let mut prev_key = OptionNumber::default();
        let mut push_option = |buffer: &mut Vec<u8>, key: OptionNumber, value: &[u8]| {
            // Recognized options are emitted in ascending number order, so
            // sequential appends cannot fail.
            encode_option(buffer, prev_key, key, value).expect("options out of order");
            prev_key = key;
        };

        if let Some(observe) = self.observe {
            let value = encode_uint(u64::from(observe), &mut scratch).to_vec();
            push_option(&mut buffer, OptionNumber::OBSERVE, &value);
        }

        for segment in self.path.segments() {
            push_option(&mut buffer, OptionNumber::URI_PATH, segment);
        }

        if let Some(content_format) = self.content_format {
            let value = encode_uint(u64::from(content_format), &mut scratch).to_vec();
            push_option(&mut buffer, OptionNumber::CONTENT_FORMAT, &value);
        }

        for query in &self.queries {
            push_option(&mut buffer, OptionNumber::URI_QUERY, query.as_bytes());
        }

        if !self.payload.is_empty() {
            buffer.push(PAYLOAD_MARKER);
            buffer.extend_from_slice(&self.payload);
        }

        buffer
    }

    /// Parses a message from its wire form.
    ///
    /// Unrecognized options are skipped; structural problems (bad version,
    /// `TKL > 8`, truncated option records) reject the whole datagram.
    pub fn from_bytes(buffer: &[u8]) -> Result<Message, Error> {
        if buffer.len() < 4 {
            return Err(Error::ParseFailure);
        }

        if buffer[0] >> MSG_VER_OFFS != COAP_VERSION {
            return Err(Error::ParseFailure);
        }

        let msg_type = MsgType::try_from((buffer[0] & MSG_T_MASK) >> MSG_T_OFFS)
            .expect("two-bit message type");
        let code = MsgCode::try_from(buffer[1]).ok_or(Error::UnknownMessageCode)?;
        let msg_id = MsgId::from(buffer[2]) << 8 | MsgId::from(buffer[3]);

        let token_len = usize::from(buffer[0] & MSG_TKL_MASK);
        if token_len > 8 || buffer.len() < 4 + token_len {
            return Err(Error::ParseFailure);
        }
        let token = MsgToken(try_decode_u64(&buffer[4..4 + token_len]).unwrap_or(0));

        let mut path = Path::empty();
        let mut queries = Vec::new();
        let mut content_format = None;
        let mut observe = None;

        let mut iter = OptionIterator::new(&buffer[4 + token_len..]);

        for result in &mut iter {
            match result? {
                (OptionNumber::OBSERVE, value) => {
                    observe = Some(try_decode_u32(value).ok_or(Error::ParseFailure)?);
                }
                (OptionNumber::URI_PATH, value) => {
                    path.push_segment(value).map_err(|_| Error::ParseFailure)?;
                }
                (OptionNumber::CONTENT_FORMAT, value) => {
                    content_format = Some(try_decode_u16(value).ok_or(Error::ParseFailure)?);
                }
                (OptionNumber::URI_QUERY, value) => {
                    queries.push(String::from_utf8_lossy(value).into_owned());
                }
                (key, value) => {
                    if key.is_critical() {
                        warn!("Ignoring critical option {} ({} bytes)", key, value.len());
                    } else {
                        debug!("Ignoring option {} ({} bytes)", key, value.len());
                    }
                }
            }
        }

        let payload = iter.as_slice().to_vec();

        Ok(Message {
            msg_type,
            msg_id,
            code,
            token,
            path,
            queries,
            content_format,
            observe,
            payload,
        })
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {} msgid:{:04X} token:{}",
            self.msg_type, self.code, self.msg_id, self.token
        )?;
        if !self.path.is_empty() {
            write!(f, " {}", self.path)?;
        }
        Ok(())
    }
}
