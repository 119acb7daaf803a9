// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::core::identity::SockId;
use crate::core::netip::NetIp;
use crate::error::ProtocolError;
use crate::protocol::handshake::*;

#[test]
fn test_identity_handshake_flow() {
    let connector_id = SockId::derive("connector");
    let acceptor_id = SockId::derive("acceptor");
    let connector_ip = NetIp::v4([10, 0, 0, 1], 4000);
    let acceptor_ip = NetIp::v4([10, 0, 0, 2], 5000);

    let mut connector = Status::connect();
    let mut acceptor = Status::accept();

    // =================== Step 1: TCP connect completes ===================
    connector = connector
        .apply(HandshakeEvent::Connected)
        .expect("connect completes");
    assert_eq!(connector.phase(), Phase::SecureSend);
    let hello = encode_identity(&connector_id, &connector_ip);

    // =================== Step 2: Connector flushes its identity ===================
    connector = connector
        .apply(HandshakeEvent::QueueDrained)
        .expect("identity flushed");
    assert_eq!(connector.phase(), Phase::SecureRecv);

    // =================== Step 3: Acceptor validates and answers ===================
    let (received_id, received_ip) = decode_identity(&hello).expect("valid payload");
    assert_eq!(received_id, connector_id);
    assert_eq!(received_ip, connector_ip);
    verify_identity(&acceptor_id, None, &received_id).expect("not ourselves");

    acceptor = acceptor
        .apply(HandshakeEvent::IdentityReceived)
        .expect("identity accepted");
    assert_eq!(acceptor.phase(), Phase::SecureSend);
    let reply = encode_identity(&acceptor_id, &acceptor_ip);

    acceptor = acceptor
        .apply(HandshakeEvent::QueueDrained)
        .expect("reply flushed");
    assert!(acceptor.is_connected());

    // =================== Step 4: Connector validates the reply ===================
    let (reply_id, _) = decode_identity(&reply).expect("valid payload");
    verify_identity(&connector_id, Some(&acceptor_id), &reply_id).expect("dialed identity");
    connector = connector
        .apply(HandshakeEvent::IdentityReceived)
        .expect("reply accepted");

    assert!(connector.is_connected());
    assert!(!connector.is_securing());
    assert_eq!(connector.role(), Role::Connect);
    assert_eq!(acceptor.role(), Role::Accept);
}

#[test]
fn test_graceful_close_flushes_first() {
    let connected = Status::accept()
        .apply(HandshakeEvent::IdentityReceived)
        .and_then(|s| s.apply(HandshakeEvent::QueueDrained))
        .expect("handshake");

    let closing = connected
        .apply(HandshakeEvent::Disconnect)
        .expect("disconnect");
    assert_eq!(closing.phase(), Phase::Closing);
    assert!(!closing.wants_read());
    assert!(closing.wants_write(true));

    let closed = closing
        .apply(HandshakeEvent::QueueDrained)
        .expect("drained");
    assert!(closed.is_closed());
}

#[test]
fn test_disconnect_while_securing_is_immediate() {
    for status in [Status::accept(), Status::connect()] {
        let closed = status.apply(HandshakeEvent::Disconnect).expect("disconnect");
        assert!(closed.is_closed());
    }
}

#[test]
fn test_message_while_sending_identity_is_violation() {
    // An accept-side connection that already got the identity must not get another
    let sending = Status::accept()
        .apply(HandshakeEvent::IdentityReceived)
        .expect("first identity");
    assert!(matches!(
        sending.apply(HandshakeEvent::IdentityReceived),
        Err(ProtocolError::UnexpectedMessage)
    ));
}

#[test]
fn test_connector_rejects_wrong_peer() {
    let own = SockId::derive("me");
    let dialed = SockId::derive("expected-peer");
    let impostor = SockId::derive("someone-else");
    let reply = encode_identity(&impostor, &NetIp::v4([127, 0, 0, 1], 9000));

    let (received, _) = decode_identity(&reply).expect("valid payload");
    let err = verify_identity(&own, Some(&dialed), &received).expect_err("mismatch");
    assert!(err.is_protocol_violation());
}

#[test]
fn test_unknown_netip_family_in_payload() {
    let mut payload = encode_identity(&SockId::derive("x"), &NetIp::NONE);
    payload[33] = 9;
    assert!(matches!(
        decode_identity(&payload),
        Err(ProtocolError::InvalidNetIp(9))
    ));
}
