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

//! Demonstration CoAP server.
//!
//! Serves a handful of toy resources on the default port:
//!
//! * `/name` — GET returns the server name, PUT changes it.
//! * `/dynamic` — POST stores the payload and returns its index.
//! * `/dynamic/<index>` — GET and DELETE stored entries.
//! * `/uptime` — GET returns the uptime; observers get an update every
//!   five seconds.

use log::info;
use sync_coap::consts::DEFAULT_PORT_COAP_UDP;
use sync_coap::{Messaging, MsgCode, Notifier, Path, RestResponse};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn content<P: Into<Vec<u8>>>(payload: P) -> RestResponse {
    RestResponse::default()
        .with_code(MsgCode::SuccessContent)
        .with_payload(payload)
}

fn dynamic_index(path: &Path) -> Option<u32> {
    if path.len() != 2 {
        return None;
    }
    std::str::from_utf8(path.get(1)).ok()?.parse().ok()
}

fn main() {
    env_logger::init();

    let mut messaging = Messaging::new(DEFAULT_PORT_COAP_UDP).expect("opening UDP endpoint failed");

    let name = Arc::new(Mutex::new(String::from("coap_server")));
    let dynamic: Arc<Mutex<(u32, HashMap<u32, Vec<u8>>)>> =
        Arc::new(Mutex::new((0, HashMap::new())));
    let observers: Arc<Mutex<Vec<Notifier>>> = Arc::new(Mutex::new(Vec::new()));
    let started = Instant::now();

    let uptime = move || format!("{}s", started.elapsed().as_secs());

    let get_name = name.clone();
    let put_name = name.clone();
    let post_dynamic = dynamic.clone();
    let get_dynamic = dynamic.clone();
    let delete_dynamic = dynamic.clone();
    let observe_uptime = observers.clone();
    let get_uptime = uptime.clone();
    let observed_uptime = uptime.clone();

    messaging
        .request_handler()
        .on_uri("/name")
            .on_get(move |_| content(get_name.lock().unwrap().clone()))
            .on_put(move |_, payload| {
                *put_name.lock().unwrap() = String::from_utf8_lossy(payload).into_owned();
                RestResponse::default().with_code(MsgCode::SuccessChanged)
            })
        .on_uri("/dynamic")
            .on_post(move |_, payload| {
                let mut dynamic = post_dynamic.lock().unwrap();
                dynamic.0 += 1;
                let index = dynamic.0;
                dynamic.1.insert(index, payload.to_vec());
                RestResponse::default()
                    .with_code(MsgCode::SuccessCreated)
                    .with_payload(index.to_string())
            })
        .on_uri("/dynamic/?")
            .on_get(move |path| {
                dynamic_index(path)
                    .and_then(|index| get_dynamic.lock().unwrap().1.get(&index).cloned())
                    .map(content)
                    .unwrap_or_default()
            })
            .on_delete(move |path| {
                match dynamic_index(path)
                    .and_then(|index| delete_dynamic.lock().unwrap().1.remove(&index))
                {
                    Some(_) => RestResponse::default().with_code(MsgCode::SuccessDeleted),
                    None => RestResponse::default(),
                }
            })
        .on_uri("/uptime")
            .on_get(move |_| content(get_uptime()))
            .on_observe(move |_, notifier| {
                info!("New uptime observer");
                observe_uptime.lock().unwrap().push(notifier);
                content(observed_uptime())
            });

    messaging.loop_start();
    info!("Serving on port {}", DEFAULT_PORT_COAP_UDP);

    // Publish the uptime to all observers every five seconds; observers
    // whose observation went away are weeded out as their channel closes.
    loop {
        std::thread::sleep(Duration::from_secs(5));
        observers
            .lock()
            .unwrap()
            .retain(|notifier| notifier.notify(content(uptime())));
    }
}
