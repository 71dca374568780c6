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

//! Command-line CoAP client.
//!
//! ```text
//! client <request> [-n] <uri> [<payload>]
//! ```
//!
//! Sample invocations:
//!
//! ```text
//! client get -n coap://*:5683/.well-known/core
//! client get coap://localhost:5683/name
//! client put coap://localhost/actions/shutdown now
//! client observe coap://localhost/uptime
//! ```

use clap::{App, Arg};
use log::debug;
use sync_coap::{params, CoapUri, Error, Messaging, ResponseStream, RestResponse};

use std::process::exit;
use std::time::Duration;

fn print_response(response: &RestResponse) {
    print!("{}", response.code());
    if let Some(content_format) = response.content_format() {
        print!(" - ContentFormat: {}", content_format);
    }
    println!();
    println!("{}", response.payload_str());
}

fn print_stream_forever(stream: &ResponseStream) -> ! {
    loop {
        match stream.wait(Duration::from_secs(1)) {
            Ok(response) => print_response(&response),
            Err(Error::ResponseTimeout) => continue,
            Err(e) => {
                eprintln!("Observation ended: {}", e);
                exit(0);
            }
        }
    }
}

fn main() {
    env_logger::init();

    let matches = App::new("client")
        .about("Sends CoAP requests")
        .arg(
            Arg::with_name("request")
                .help("Request verb")
                .possible_values(&["get", "put", "post", "delete", "observe"])
                .case_insensitive(true)
                .required(true),
        )
        .arg(
            Arg::with_name("nonconfirmable")
                .short("n")
                .help("Send the request as a nonconfirmable message"),
        )
        .arg(
            Arg::with_name("uri")
                .help("Request URI, e.g. coap://localhost:5683/.well-known/core (use * as the host for multicast)")
                .required(true),
        )
        .arg(Arg::with_name("payload").help("Payload for put/post requests"))
        .get_matches();

    let request = matches.value_of("request").unwrap().to_lowercase();
    let confirmable = !matches.is_present("nonconfirmable");
    let payload = matches.value_of("payload").unwrap_or("");

    let uri = match CoapUri::parse(matches.value_of("uri").unwrap()) {
        Ok(uri) => uri,
        Err(_) => {
            eprintln!("Malformed URI: {}", matches.value_of("uri").unwrap());
            exit(1);
        }
    };

    let mut messaging = match Messaging::new(0) {
        Ok(messaging) => messaging,
        Err(e) => {
            eprintln!("Opening UDP endpoint failed: {}", e);
            exit(1);
        }
    };
    messaging.loop_start();

    if uri.is_multicast() {
        if request != "get" {
            eprintln!("Invalid request type {} for multicast requests", request);
            exit(1);
        }

        let client = messaging.get_multicast_client(uri.port());
        let stream = client.get(uri.path()).expect("sending multicast request failed");

        // Collect answers for the leisure period, tagged with their sender.
        let mut responders = 0;
        while let Ok(response) = stream.wait(params::DEFAULT_LEISURE) {
            if let Some(source) = response.source() {
                println!("IP: {} Port: {}", source.ip(), source.port());
            }
            print_response(&response);
            responders += 1;
        }
        debug!("{} responders", responders);
    } else {
        let client = match messaging.get_client_for(uri.host(), uri.port()) {
            Ok(client) => client,
            Err(_) => {
                eprintln!("Unknown host: {}", uri.host());
                exit(1);
            }
        };

        let future = match request.as_str() {
            "get" => client.get(uri.path(), confirmable),
            "put" => client.put(uri.path(), payload.as_bytes(), confirmable),
            "post" => client.post(uri.path(), payload.as_bytes(), confirmable),
            "delete" => client.delete(uri.path(), confirmable),
            "observe" => {
                // Runs until interrupted.
                let stream = client
                    .observe(uri.path(), confirmable)
                    .expect("sending observe request failed");
                print_stream_forever(&stream);
            }
            _ => unreachable!("verb list is closed"),
        };

        match future {
            Ok(future) => match future.wait(2 * params::DEFAULT_LEISURE) {
                Ok(response) => print_response(&response),
                Err(e) => eprintln!("No response: {}", e),
            },
            Err(e) => eprintln!("Sending request failed: {}", e),
        }
    }

    messaging.loop_stop();
}
