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

use crate::message::MsgCode;

use std::net::SocketAddrV4;

/// Response from a REST request.
///
/// This is what resource handlers return and what request futures and streams
/// resolve to. Responses received over the network additionally carry the
/// sender's endpoint, which matters for multicast requests.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RestResponse {
    code: MsgCode,
    payload: Vec<u8>,
    content_format: Option<u16>,
    source: Option<SocketAddrV4>,
}

impl RestResponse {
    /// The response code.
    pub fn code(&self) -> MsgCode {
        self.code
    }

    /// Returns a copy of this response with the given response code.
    pub fn with_code(mut self, code: MsgCode) -> RestResponse {
        self.code = code;
        self
    }

    /// The response payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The response payload as text.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Returns a copy of this response with the given payload.
    pub fn with_payload<P: Into<Vec<u8>>>(mut self, payload: P) -> RestResponse {
        self.payload = payload.into();
        self
    }

    /// The content format, if one was set.
    pub fn content_format(&self) -> Option<u16> {
        self.content_format
    }

    /// Returns a copy of this response with the given content format.
    pub fn with_content_format(mut self, content_format: u16) -> RestResponse {
        self.content_format = Some(content_format);
        self
    }

    /// The endpoint the response was received from, when it arrived over the
    /// network.
    pub fn source(&self) -> Option<SocketAddrV4> {
        self.source
    }

    /// Returns a copy of this response tagged with the sender's endpoint.
    pub fn with_source(mut self, source: SocketAddrV4) -> RestResponse {
        self.source = Some(source);
        self
    }
}

impl Default for RestResponse {
    fn default() -> Self {
        RestResponse {
            code: MsgCode::ClientErrorNotFound,
            payload: Vec::new(),
            content_format: None,
            source: None,
        }
    }
}

impl std::fmt::Display for RestResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.code.fmt(f)
    }
}
