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

//! Parsing of `coap:` and `coaps:` URIs.

use crate::consts::{DEFAULT_PORT_COAP_DTLS, DEFAULT_PORT_COAP_UDP, URI_SCHEME_COAPS};
use crate::error::Error;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Splits a CoAP URI into scheme, host, optional port, and path:
    ///
    /// * scheme = $1
    /// * host   = $2
    /// * port   = $4
    /// * path   = $5
    static ref COAP_URI: Regex =
        Regex::new(r"^(coaps?)://([^/:?#]+)(:(\d+))?(/[^#]*)?$").expect("COAP_URI");
}

/// A parsed `coap://host[:port]/path` URI.
///
/// The host token `*` selects multicast. When the port is omitted it
/// defaults by scheme: 5683 for `coap`, 20220 for `coaps`. Note that the
/// scheme is parsed but transport security is not implemented.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CoapUri {
    scheme: String,
    host: String,
    port: u16,
    path: String,
}

impl CoapUri {
    /// Parses the given string, failing with [`Error::InvalidArgument`] if
    /// it is not a well-formed CoAP URI.
    pub fn parse(uri: &str) -> Result<CoapUri, Error> {
        let captures = COAP_URI.captures(uri).ok_or(Error::InvalidArgument)?;

        let scheme = captures[1].to_string();
        let port = match captures.get(4) {
            Some(port) => port.as_str().parse().map_err(|_| Error::InvalidArgument)?,
            None if scheme == URI_SCHEME_COAPS => DEFAULT_PORT_COAP_DTLS,
            None => DEFAULT_PORT_COAP_UDP,
        };

        Ok(CoapUri {
            scheme,
            host: captures[2].to_string(),
            port,
            path: captures
                .get(5)
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        })
    }

    /// The URI scheme, `coap` or `coaps`.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The host part of the URI.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port, either explicit or the scheme default.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The path part of the URI, including any query.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the URI addresses the multicast group instead of a single
    /// host.
    pub fn is_multicast(&self) -> bool {
        self.host == "*"
    }
}
