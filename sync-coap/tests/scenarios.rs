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

//! End-to-end exchanges driven through a scripted transport and a virtual
//! clock.

use sync_coap::{
    Message, Messaging, MockTransport, MsgCode, MsgToken, MsgType, Notifier, RestResponse,
    VirtualClock,
};

use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Rig {
    messaging: Messaging,
    transport: Arc<MockTransport>,
    clock: Arc<VirtualClock>,
}

fn rig() -> Rig {
    let transport = MockTransport::new();
    let clock = VirtualClock::new();
    let messaging = Messaging::with_transport(transport.clone(), clock.clone().as_clock());
    Rig {
        messaging,
        transport,
        clock,
    }
}

fn peer() -> SocketAddrV4 {
    "192.0.2.1:5683".parse().unwrap()
}

fn other_peer() -> SocketAddrV4 {
    "192.0.2.2:61616".parse().unwrap()
}

fn sent_messages(transport: &MockTransport) -> Vec<(SocketAddrV4, Message)> {
    transport
        .take_outbound()
        .into_iter()
        .map(|(dest, bytes)| (dest, Message::from_bytes(&bytes).unwrap()))
        .collect()
}

#[test]
fn nonconfirmable_get_round_trip() {
    let rig = rig();
    let client = rig.messaging.get_client_for("192.0.2.1", 5683).unwrap();

    let future = client.get("/xyz", false).unwrap();

    let sent = rig.transport.take_outbound();
    assert_eq!(sent.len(), 1);
    let (dest, frame) = &sent[0];
    assert_eq!(*dest, peer());
    // Ver=1, T=1 (NON), TKL=0 (first token is zero), code GET.
    assert_eq!(frame[0], 0x50);
    assert_eq!(frame[1], 0x01);

    let request = Message::from_bytes(frame).unwrap();
    assert_eq!(request.path().to_string(), "/xyz");

    let response = Message::response(
        MsgType::Non,
        4711,
        MsgCode::SuccessContent,
        request.token(),
    )
    .with_payload(b"world".to_vec());
    rig.transport.push_inbound(peer(), response.to_bytes());
    rig.messaging.loop_once();

    let response = future.wait(Duration::from_millis(10)).unwrap();
    assert_eq!(response.code(), MsgCode::SuccessContent);
    assert_eq!(response.payload(), b"world");
    assert_eq!(response.source(), Some(peer()));
}

#[test]
fn confirmable_retransmit_schedule() {
    let rig = rig();
    let client = rig.messaging.get_client_for("192.0.2.1", 5683).unwrap();

    let future = client.get("/xyz", true).unwrap();
    assert_eq!(rig.transport.take_outbound().len(), 1);

    let mut sends = 1;
    // Tick once per second up to 4 * ACK_TIMEOUT: retransmits at 1s and 3s.
    for _ in 0..4 {
        rig.clock.advance(Duration::from_secs(1));
        rig.messaging.loop_once();
        sends += rig.transport.take_outbound().len();
    }
    assert_eq!(sends, 3);

    // Up to 16 * ACK_TIMEOUT: retransmits at 7s and 15s complete the set of
    // MAX_RETRANSMITS resends.
    for _ in 4..16 {
        rig.clock.advance(Duration::from_secs(1));
        rig.messaging.loop_once();
        sends += rig.transport.take_outbound().len();
    }
    assert_eq!(sends, 5);
    assert!(future.poll().is_none());

    // The exchange expires at 31s and the waiting future resolves with the
    // synthetic 5.03.
    for _ in 16..31 {
        rig.clock.advance(Duration::from_secs(1));
        rig.messaging.loop_once();
    }
    assert!(rig.transport.take_outbound().is_empty());

    let response = future.poll().expect("expired request must resolve");
    assert_eq!(response.code(), MsgCode::ServerErrorServiceUnavailable);
}

#[test]
fn retransmits_reuse_message_id_and_token() {
    let rig = rig();
    let client = rig.messaging.get_client_for("192.0.2.1", 5683).unwrap();

    let _future = client.put("/xyz", b"v", true).unwrap();
    let original = sent_messages(&rig.transport).remove(0).1;

    rig.clock.advance(Duration::from_secs(1));
    rig.messaging.loop_once();

    let resent = sent_messages(&rig.transport).remove(0).1;
    assert_eq!(resent, original);
}

#[test]
fn acknowledgement_stops_retransmits() {
    let rig = rig();
    let client = rig.messaging.get_client_for("192.0.2.1", 5683).unwrap();

    let future = client.get("/xyz", true).unwrap();
    let request = sent_messages(&rig.transport).remove(0).1;

    // Empty ACK: transport-layer only, the future stays pending.
    rig.transport
        .push_inbound(peer(), Message::empty_ack(request.msg_id()).to_bytes());
    rig.messaging.loop_once();
    assert!(future.poll().is_none());

    // No retransmits afterwards, even well past the schedule.
    for _ in 0..40 {
        rig.clock.advance(Duration::from_secs(1));
        rig.messaging.loop_once();
    }
    assert!(rig.transport.take_outbound().is_empty());

    // The delayed response arrives as a separate confirmable message and is
    // acknowledged by the client.
    let response = Message::response(
        MsgType::Con,
        0x7001,
        MsgCode::SuccessContent,
        request.token(),
    )
    .with_payload(b"late".to_vec());
    rig.transport.push_inbound(peer(), response.to_bytes());
    rig.messaging.loop_once();

    let resolved = future.wait(Duration::from_millis(10)).unwrap();
    assert_eq!(resolved.payload(), b"late");

    let sent = sent_messages(&rig.transport);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.msg_type(), MsgType::Ack);
    assert_eq!(sent[0].1.code(), MsgCode::Empty);
    assert_eq!(sent[0].1.msg_id(), 0x7001);
}

#[test]
fn piggybacked_response_for_confirmable_get() {
    let rig = rig();
    rig.messaging.request_handler().on_uri("/").on_get(|_| {
        RestResponse::default()
            .with_code(MsgCode::SuccessContent)
            .with_payload("hello")
    });

    let request = Message::request(MsgType::Con, 0x1234, MsgCode::MethodGet, MsgToken(7), "/")
        .unwrap();
    rig.transport.push_inbound(peer(), request.to_bytes());
    rig.messaging.loop_once();

    let sent = sent_messages(&rig.transport);
    assert_eq!(sent.len(), 1, "piggybacked reply must be a single message");

    let reply = &sent[0].1;
    assert_eq!(sent[0].0, peer());
    assert_eq!(reply.msg_type(), MsgType::Ack);
    assert_eq!(reply.msg_id(), 0x1234);
    assert_eq!(reply.token(), MsgToken(7));
    assert_eq!(reply.code(), MsgCode::SuccessContent);
    assert_eq!(reply.payload(), b"hello");
}

#[test]
fn delayed_handler_acks_first_and_responds_separately() {
    let rig = rig();
    rig.messaging
        .request_handler()
        .on_uri("/slow")
        .on_get_delayed(|_| {
            RestResponse::default()
                .with_code(MsgCode::SuccessContent)
                .with_payload("eventually")
        });

    let request =
        Message::request(MsgType::Con, 0x2222, MsgCode::MethodGet, MsgToken(9), "/slow").unwrap();
    rig.transport.push_inbound(peer(), request.to_bytes());
    rig.messaging.loop_once();

    let sent = sent_messages(&rig.transport);
    assert_eq!(sent.len(), 2);

    let ack = &sent[0].1;
    assert_eq!(ack.msg_type(), MsgType::Ack);
    assert_eq!(ack.code(), MsgCode::Empty);
    assert_eq!(ack.msg_id(), 0x2222);

    let response = &sent[1].1;
    assert_eq!(response.msg_type(), MsgType::Con);
    assert_ne!(response.msg_id(), 0x2222);
    assert_eq!(response.token(), MsgToken(9));
    assert_eq!(response.payload(), b"eventually");
}

#[test]
fn nonconfirmable_request_gets_nonconfirmable_reply() {
    let rig = rig();
    rig.messaging
        .request_handler()
        .on_uri("/x")
        .on_put(|_, payload| {
            assert_eq!(payload, b"value");
            RestResponse::default().with_code(MsgCode::SuccessChanged)
        });

    let request = Message::request(MsgType::Non, 5, MsgCode::MethodPut, MsgToken(3), "/x")
        .unwrap()
        .with_payload(b"value".to_vec());
    rig.transport.push_inbound(peer(), request.to_bytes());
    rig.messaging.loop_once();

    let sent = sent_messages(&rig.transport);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.msg_type(), MsgType::Non);
    assert_eq!(sent[0].1.code(), MsgCode::SuccessChanged);
    assert_eq!(sent[0].1.token(), MsgToken(3));
}

#[test]
fn unknown_path_and_method_errors() {
    let rig = rig();
    rig.messaging.request_handler().on_uri("/known").on_get(|_| {
        RestResponse::default().with_code(MsgCode::SuccessContent)
    });

    let request =
        Message::request(MsgType::Non, 1, MsgCode::MethodGet, MsgToken(1), "/unknown").unwrap();
    rig.transport.push_inbound(peer(), request.to_bytes());
    rig.messaging.loop_once();
    assert_eq!(
        sent_messages(&rig.transport)[0].1.code(),
        MsgCode::ClientErrorNotFound
    );

    let request =
        Message::request(MsgType::Non, 2, MsgCode::MethodDelete, MsgToken(2), "/known").unwrap();
    rig.transport.push_inbound(peer(), request.to_bytes());
    rig.messaging.loop_once();
    assert_eq!(
        sent_messages(&rig.transport)[0].1.code(),
        MsgCode::ClientErrorMethodNotAllowed
    );
}

#[test]
fn unhandled_request_code_is_bad_request() {
    let rig = rig();

    let request =
        Message::request(MsgType::Con, 21, MsgCode::MethodFetch, MsgToken(4), "/x").unwrap();
    rig.transport.push_inbound(peer(), request.to_bytes());
    rig.messaging.loop_once();

    let sent = sent_messages(&rig.transport);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.msg_type(), MsgType::Ack);
    assert_eq!(sent[0].1.code(), MsgCode::ClientErrorBadRequest);
    assert_eq!(sent[0].1.msg_id(), 21);
}

#[test]
fn ping_is_answered_with_reset() {
    let rig = rig();

    let ping = Message::request(MsgType::Con, 0x0F0F, MsgCode::Empty, MsgToken(0), "").unwrap();
    rig.transport.push_inbound(peer(), ping.to_bytes());
    rig.messaging.loop_once();

    let sent = sent_messages(&rig.transport);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.msg_type(), MsgType::Res);
    assert_eq!(sent[0].1.code(), MsgCode::Empty);
    assert_eq!(sent[0].1.msg_id(), 0x0F0F);
}

#[test]
fn ping_future_resolves_on_reset() {
    let rig = rig();
    let client = rig.messaging.get_client_for("192.0.2.1", 5683).unwrap();

    let future = client.ping().unwrap();
    let request = sent_messages(&rig.transport).remove(0).1;
    assert_eq!(request.msg_type(), MsgType::Con);
    assert_eq!(request.code(), MsgCode::Empty);

    rig.transport
        .push_inbound(peer(), Message::reset(request.msg_id()).to_bytes());
    rig.messaging.loop_once();

    let pong = future.wait(Duration::from_millis(10)).unwrap();
    assert_eq!(pong.code(), MsgCode::Empty);
}

#[test]
fn malformed_datagram_is_dropped() {
    let rig = rig();
    rig.messaging.request_handler().on_uri("/x").on_get(|_| {
        RestResponse::default().with_code(MsgCode::SuccessContent)
    });

    // Bad version.
    rig.transport.push_inbound(peer(), vec![0x10, 0x01, 0, 0]);
    rig.messaging.loop_once();
    // Truncated header.
    rig.transport.push_inbound(peer(), vec![0x40]);
    rig.messaging.loop_once();

    assert!(rig.transport.take_outbound().is_empty());

    // The loop is still alive and serving.
    let request = Message::request(MsgType::Non, 1, MsgCode::MethodGet, MsgToken(1), "/x").unwrap();
    rig.transport.push_inbound(peer(), request.to_bytes());
    rig.messaging.loop_once();
    assert_eq!(sent_messages(&rig.transport).len(), 1);
}

fn observable_rig() -> (Rig, Arc<Mutex<Option<Notifier>>>) {
    let rig = rig();
    let notifier_slot: Arc<Mutex<Option<Notifier>>> = Arc::new(Mutex::new(None));
    let slot = notifier_slot.clone();
    rig.messaging
        .request_handler()
        .on_uri("/obs")
        .on_observe(move |_, notifier| {
            *slot.lock().unwrap() = Some(notifier);
            RestResponse::default()
                .with_code(MsgCode::SuccessContent)
                .with_payload("initial")
        });
    (rig, notifier_slot)
}

#[test]
fn observation_pushes_updates_in_order() {
    let (rig, notifier_slot) = observable_rig();

    let register = Message::request(MsgType::Non, 10, MsgCode::MethodGet, MsgToken(42), "/obs")
        .unwrap()
        .with_observe(0);
    rig.transport.push_inbound(peer(), register.to_bytes());
    rig.messaging.loop_once();

    // Immediate reply comes from the OBSERVE handler.
    let sent = sent_messages(&rig.transport);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.payload(), b"initial");

    let notifier = notifier_slot.lock().unwrap().clone().unwrap();
    for update in &["a", "b", "c"] {
        assert!(notifier.notify(
            RestResponse::default()
                .with_code(MsgCode::SuccessContent)
                .with_payload(*update)
        ));
    }
    rig.messaging.loop_once();

    let pushes = sent_messages(&rig.transport);
    assert_eq!(pushes.len(), 3);
    for (push, expected) in pushes.iter().zip(&["a", "b", "c"]) {
        // Notifications reuse the observer's token and mirror the request
        // type, each under a fresh message id.
        assert_eq!(push.1.token(), MsgToken(42));
        assert_eq!(push.1.msg_type(), MsgType::Non);
        assert_eq!(push.1.payload(), expected.as_bytes());
        assert_eq!(push.0, peer());
    }
}

#[test]
fn reset_from_observer_cancels_observation() {
    let (rig, notifier_slot) = observable_rig();

    // Confirmable registration: notifications are confirmable too.
    let register = Message::request(MsgType::Con, 11, MsgCode::MethodGet, MsgToken(7), "/obs")
        .unwrap()
        .with_observe(0);
    rig.transport.push_inbound(peer(), register.to_bytes());
    rig.messaging.loop_once();
    sent_messages(&rig.transport);

    let notifier = notifier_slot.lock().unwrap().clone().unwrap();
    assert!(notifier.notify(
        RestResponse::default()
            .with_code(MsgCode::SuccessContent)
            .with_payload("x")
    ));
    rig.messaging.loop_once();

    let pushes = sent_messages(&rig.transport);
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].1.msg_type(), MsgType::Con);

    // The observer rejects the notification with a reset.
    rig.transport
        .push_inbound(peer(), Message::reset(pushes[0].1.msg_id()).to_bytes());
    rig.messaging.loop_once();

    // Later updates must not reach the wire.
    notifier.notify(
        RestResponse::default()
            .with_code(MsgCode::SuccessContent)
            .with_payload("y"),
    );
    rig.messaging.loop_once();
    assert!(rig.transport.take_outbound().is_empty());
}

#[test]
fn expired_notification_cancels_observation() {
    let (rig, notifier_slot) = observable_rig();

    let register = Message::request(MsgType::Con, 12, MsgCode::MethodGet, MsgToken(8), "/obs")
        .unwrap()
        .with_observe(0);
    rig.transport.push_inbound(peer(), register.to_bytes());
    rig.messaging.loop_once();
    sent_messages(&rig.transport);

    let notifier = notifier_slot.lock().unwrap().clone().unwrap();
    notifier.notify(
        RestResponse::default()
            .with_code(MsgCode::SuccessContent)
            .with_payload("x"),
    );
    rig.messaging.loop_once();
    assert_eq!(sent_messages(&rig.transport).len(), 1);

    // Let the confirmable push run out of retransmissions.
    for _ in 0..32 {
        rig.clock.advance(Duration::from_secs(1));
        rig.messaging.loop_once();
    }
    rig.transport.take_outbound();

    // The observation is gone; pushing into the notifier now fails.
    assert!(!notifier.notify(RestResponse::default().with_code(MsgCode::SuccessContent)));
}

#[test]
fn deregister_removes_observation_and_serves_get() {
    let rig = rig();
    let notifier_slot: Arc<Mutex<Option<Notifier>>> = Arc::new(Mutex::new(None));
    let slot = notifier_slot.clone();
    rig.messaging
        .request_handler()
        .on_uri("/obs")
        .on_observe(move |_, notifier| {
            *slot.lock().unwrap() = Some(notifier);
            RestResponse::default()
                .with_code(MsgCode::SuccessContent)
                .with_payload("initial")
        })
        .on_get(|_| {
            RestResponse::default()
                .with_code(MsgCode::SuccessContent)
                .with_payload("plain")
        });

    let register = Message::request(MsgType::Non, 13, MsgCode::MethodGet, MsgToken(5), "/obs")
        .unwrap()
        .with_observe(0);
    rig.transport.push_inbound(peer(), register.to_bytes());
    rig.messaging.loop_once();
    sent_messages(&rig.transport);

    let notifier = notifier_slot.lock().unwrap().clone().unwrap();

    let deregister = Message::request(MsgType::Non, 14, MsgCode::MethodGet, MsgToken(5), "/obs")
        .unwrap()
        .with_observe(1);
    rig.transport.push_inbound(peer(), deregister.to_bytes());
    rig.messaging.loop_once();

    let sent = sent_messages(&rig.transport);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.payload(), b"plain");

    assert!(!notifier.notify(RestResponse::default().with_code(MsgCode::SuccessContent)));
}

#[test]
fn client_observe_stream_in_order() {
    let rig = rig();
    let client = rig.messaging.get_client_for("192.0.2.1", 5683).unwrap();

    let stream = client.observe("/obs", false).unwrap();
    let request = sent_messages(&rig.transport).remove(0).1;
    assert_eq!(request.observe(), Some(0));
    assert_eq!(request.code(), MsgCode::MethodGet);

    for (msg_id, payload) in &[(100u16, "a"), (101, "b"), (102, "c")] {
        let push = Message::response(
            MsgType::Non,
            *msg_id,
            MsgCode::SuccessContent,
            request.token(),
        )
        .with_payload(payload.as_bytes().to_vec());
        rig.transport.push_inbound(peer(), push.to_bytes());
        rig.messaging.loop_once();
    }

    for expected in &["a", "b", "c"] {
        let response = stream.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(response.payload(), expected.as_bytes());
    }
    assert!(stream.poll().is_none());
}

#[test]
fn multicast_get_tags_responders() {
    let rig = rig();
    let client = rig.messaging.get_multicast_client(5683);

    let stream = client.get("/info").unwrap();

    let sent = sent_messages(&rig.transport);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "224.0.1.187:5683".parse().unwrap());
    assert_eq!(sent[0].1.msg_type(), MsgType::Non);
    let token = sent[0].1.token();

    for (source, payload) in &[(peer(), "one"), (other_peer(), "two")] {
        let response = Message::response(MsgType::Non, 1, MsgCode::SuccessContent, token)
            .with_payload(payload.as_bytes().to_vec());
        rig.transport.push_inbound(*source, response.to_bytes());
        rig.messaging.loop_once();
    }

    let first = stream.wait(Duration::from_millis(10)).unwrap();
    assert_eq!(first.payload(), b"one");
    assert_eq!(first.source(), Some(peer()));

    let second = stream.wait(Duration::from_millis(10)).unwrap();
    assert_eq!(second.payload(), b"two");
    assert_eq!(second.source(), Some(other_peer()));
}

#[test]
fn unexpected_response_is_dropped() {
    let rig = rig();

    let stray = Message::response(MsgType::Non, 9, MsgCode::SuccessContent, MsgToken(999))
        .with_payload(b"stray".to_vec());
    rig.transport.push_inbound(peer(), stray.to_bytes());
    rig.messaging.loop_once();

    assert!(rig.transport.take_outbound().is_empty());
}
