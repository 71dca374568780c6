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

use crate::response::RestResponse;

use std::sync::mpsc;

/// Write-only handle a resource uses to publish updates to one observer.
///
/// An OBSERVE handler receives one `Notifier` per registered observer and
/// keeps it for as long as it wants to publish updates. The server engine
/// holds the other end of the channel: dropping the `Notifier` ends the
/// observation, and once the observation is cancelled (observer reset,
/// deregistration, or retransmission timeout) [`Notifier::notify`] starts
/// returning `false`.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<RestResponse>,
}

impl Notifier {
    pub(crate) fn new() -> (Notifier, mpsc::Receiver<RestResponse>) {
        let (tx, rx) = mpsc::channel();
        (Notifier { tx }, rx)
    }

    /// Publishes one update to the observer.
    ///
    /// Returns `false` if the observation no longer exists.
    pub fn notify(&self, response: RestResponse) -> bool {
        self.tx.send(response).is_ok()
    }
}
