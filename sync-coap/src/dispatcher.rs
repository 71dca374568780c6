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

//! Matching inbound requests to resource handlers.

use crate::message::MsgCode;
use crate::observe::Notifier;
use crate::path::{Path, PathPattern};
use crate::response::RestResponse;

/// Handler invoked for GET and DELETE requests.
pub type PathHandler = Box<dyn Fn(&Path) -> RestResponse + Send>;

/// Handler invoked for PUT and POST requests, which carry a payload.
pub type PayloadHandler = Box<dyn Fn(&Path, &[u8]) -> RestResponse + Send>;

/// Handler invoked when an observer registers.
///
/// The handler's return value is the immediate reply to the registration;
/// the [`Notifier`] can be retained to push subsequent updates.
pub type ObserveHandler = Box<dyn Fn(&Path, Notifier) -> RestResponse + Send>;

fn method_not_allowed() -> RestResponse {
    RestResponse::default().with_code(MsgCode::ClientErrorMethodNotAllowed)
}

fn not_found() -> RestResponse {
    RestResponse::default().with_code(MsgCode::ClientErrorNotFound)
}

/// The set of callbacks registered for one path pattern.
///
/// Each method slot carries a `delayed` flag; a delayed handler's confirmable
/// response is not piggybacked onto the acknowledgement but sent as a
/// separate confirmable message.
#[derive(Default)]
pub struct RequestHandler {
    get: Option<(PathHandler, bool)>,
    put: Option<(PayloadHandler, bool)>,
    post: Option<(PayloadHandler, bool)>,
    delete: Option<(PathHandler, bool)>,
    observe: Option<(ObserveHandler, bool)>,
}

impl RequestHandler {
    /// Invokes the GET callback, or replies 4.05 if none is registered.
    pub fn get(&self, path: &Path) -> RestResponse {
        match &self.get {
            Some((f, _)) => f(path),
            None => method_not_allowed(),
        }
    }

    /// Invokes the PUT callback, or replies 4.05 if none is registered.
    pub fn put(&self, path: &Path, payload: &[u8]) -> RestResponse {
        match &self.put {
            Some((f, _)) => f(path, payload),
            None => method_not_allowed(),
        }
    }

    /// Invokes the POST callback, or replies 4.05 if none is registered.
    pub fn post(&self, path: &Path, payload: &[u8]) -> RestResponse {
        match &self.post {
            Some((f, _)) => f(path, payload),
            None => method_not_allowed(),
        }
    }

    /// Invokes the DELETE callback, or replies 4.05 if none is registered.
    pub fn delete(&self, path: &Path) -> RestResponse {
        match &self.delete {
            Some((f, _)) => f(path),
            None => method_not_allowed(),
        }
    }

    /// Invokes the OBSERVE callback, or replies 4.05 if none is registered.
    pub fn observe(&self, path: &Path, notifier: Notifier) -> RestResponse {
        match &self.observe {
            Some((f, _)) => f(path, notifier),
            None => method_not_allowed(),
        }
    }

    /// Whether the GET callback is marked delayed.
    pub fn is_get_delayed(&self) -> bool {
        matches!(&self.get, Some((_, true)))
    }

    /// Whether the PUT callback is marked delayed.
    pub fn is_put_delayed(&self) -> bool {
        matches!(&self.put, Some((_, true)))
    }

    /// Whether the POST callback is marked delayed.
    pub fn is_post_delayed(&self) -> bool {
        matches!(&self.post, Some((_, true)))
    }

    /// Whether the DELETE callback is marked delayed.
    pub fn is_delete_delayed(&self) -> bool {
        matches!(&self.delete, Some((_, true)))
    }

    /// Whether the OBSERVE callback is marked delayed.
    pub fn is_observe_delayed(&self) -> bool {
        matches!(&self.observe, Some((_, true)))
    }
}

/// Ordered table matching path patterns to request handlers.
///
/// The table is configured before the event loop starts and is only read
/// afterwards. Resolution is a linear scan; the first matching pattern wins.
#[derive(Default)]
pub struct RequestHandlerDispatcher {
    handlers: Vec<(PathPattern, RequestHandler)>,
}

impl RequestHandlerDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> RequestHandlerDispatcher {
        Default::default()
    }

    /// Registers a new handler for the given path pattern and returns a
    /// builder for configuring it:
    ///
    /// ```
    /// # use sync_coap::{MsgCode, RequestHandlerDispatcher, RestResponse};
    /// # let mut dispatcher = RequestHandlerDispatcher::new();
    /// dispatcher
    ///     .on_uri("/name")
    ///         .on_get(|_| RestResponse::default().with_code(MsgCode::SuccessContent))
    ///     .on_uri("/actions/?")
    ///         .on_post(|_, _payload| {
    ///             RestResponse::default().with_code(MsgCode::SuccessChanged)
    ///         });
    /// ```
    ///
    /// Panics if the pattern is not a valid path pattern; registration
    /// happens at startup with literal patterns.
    pub fn on_uri(&mut self, pattern: &str) -> HandlerBuilder<'_> {
        let pattern = PathPattern::new(pattern).expect("invalid path pattern");
        self.handlers.push((pattern, RequestHandler::default()));
        let index = self.handlers.len() - 1;
        HandlerBuilder {
            dispatcher: self,
            index,
        }
    }

    fn find(&self, path: &Path) -> Option<&RequestHandler> {
        self.handlers
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, handler)| handler)
    }

    /// Routes a GET request, or replies 4.04 when no pattern matches.
    pub fn get(&self, path: &Path) -> RestResponse {
        self.find(path).map(|h| h.get(path)).unwrap_or_else(not_found)
    }

    /// Routes a PUT request, or replies 4.04 when no pattern matches.
    pub fn put(&self, path: &Path, payload: &[u8]) -> RestResponse {
        self.find(path)
            .map(|h| h.put(path, payload))
            .unwrap_or_else(not_found)
    }

    /// Routes a POST request, or replies 4.04 when no pattern matches.
    pub fn post(&self, path: &Path, payload: &[u8]) -> RestResponse {
        self.find(path)
            .map(|h| h.post(path, payload))
            .unwrap_or_else(not_found)
    }

    /// Routes a DELETE request, or replies 4.04 when no pattern matches.
    pub fn delete(&self, path: &Path) -> RestResponse {
        self.find(path)
            .map(|h| h.delete(path))
            .unwrap_or_else(not_found)
    }

    /// Routes an observer registration, or replies 4.04 when no pattern
    /// matches.
    pub fn observe(&self, path: &Path, notifier: Notifier) -> RestResponse {
        self.find(path)
            .map(|h| h.observe(path, notifier))
            .unwrap_or_else(not_found)
    }

    /// Whether the handler matching `path` has a delayed GET callback.
    pub fn is_get_delayed(&self, path: &Path) -> bool {
        self.find(path).map_or(false, RequestHandler::is_get_delayed)
    }

    /// Whether the handler matching `path` has a delayed PUT callback.
    pub fn is_put_delayed(&self, path: &Path) -> bool {
        self.find(path).map_or(false, RequestHandler::is_put_delayed)
    }

    /// Whether the handler matching `path` has a delayed POST callback.
    pub fn is_post_delayed(&self, path: &Path) -> bool {
        self.find(path).map_or(false, RequestHandler::is_post_delayed)
    }

    /// Whether the handler matching `path` has a delayed DELETE callback.
    pub fn is_delete_delayed(&self, path: &Path) -> bool {
        self.find(path)
            .map_or(false, RequestHandler::is_delete_delayed)
    }

    /// Whether the handler matching `path` has a delayed OBSERVE callback.
    pub fn is_observe_delayed(&self, path: &Path) -> bool {
        self.find(path)
            .map_or(false, RequestHandler::is_observe_delayed)
    }
}

/// Fluent configuration handle returned by
/// [`RequestHandlerDispatcher::on_uri`].
pub struct HandlerBuilder<'a> {
    dispatcher: &'a mut RequestHandlerDispatcher,
    index: usize,
}

impl<'a> HandlerBuilder<'a> {
    fn handler(&mut self) -> &mut RequestHandler {
        &mut self.dispatcher.handlers[self.index].1
    }

    /// Registers the GET callback.
    pub fn on_get<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path) -> RestResponse + Send + 'static,
    {
        self.handler().get = Some((Box::new(f), false));
        self
    }

    /// Registers the GET callback, marked delayed.
    pub fn on_get_delayed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path) -> RestResponse + Send + 'static,
    {
        self.handler().get = Some((Box::new(f), true));
        self
    }

    /// Registers the PUT callback.
    pub fn on_put<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path, &[u8]) -> RestResponse + Send + 'static,
    {
        self.handler().put = Some((Box::new(f), false));
        self
    }

    /// Registers the PUT callback, marked delayed.
    pub fn on_put_delayed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path, &[u8]) -> RestResponse + Send + 'static,
    {
        self.handler().put = Some((Box::new(f), true));
        self
    }

    /// Registers the POST callback.
    pub fn on_post<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path, &[u8]) -> RestResponse + Send + 'static,
    {
        self.handler().post = Some((Box::new(f), false));
        self
    }

    /// Registers the POST callback, marked delayed.
    pub fn on_post_delayed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path, &[u8]) -> RestResponse + Send + 'static,
    {
        self.handler().post = Some((Box::new(f), true));
        self
    }

    /// Registers the DELETE callback.
    pub fn on_delete<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path) -> RestResponse + Send + 'static,
    {
        self.handler().delete = Some((Box::new(f), false));
        self
    }

    /// Registers the DELETE callback, marked delayed.
    pub fn on_delete_delayed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path) -> RestResponse + Send + 'static,
    {
        self.handler().delete = Some((Box::new(f), true));
        self
    }

    /// Registers the OBSERVE callback.
    pub fn on_observe<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path, Notifier) -> RestResponse + Send + 'static,
    {
        self.handler().observe = Some((Box::new(f), false));
        self
    }

    /// Registers the OBSERVE callback, marked delayed.
    pub fn on_observe_delayed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path, Notifier) -> RestResponse + Send + 'static,
    {
        self.handler().observe = Some((Box::new(f), true));
        self
    }

    /// Starts configuring a handler for another path pattern.
    pub fn on_uri(self, pattern: &str) -> HandlerBuilder<'a> {
        self.dispatcher.on_uri(pattern)
    }
}
