#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the public building blocks
//! Boundary conditions, stale handles, resource limits and malformed input

use peerlink::core::frame::{FrameReader, ReadProgress, FRAME_HEADER_SIZE};
use peerlink::core::message::{MessagePool, MessageQueue};
use peerlink::error::ProtocolError;
use peerlink::protocol::handshake::{
    decode_identity, encode_identity, verify_identity, HANDSHAKE_PAYLOAD_SIZE,
};
use peerlink::{
    AddressRegistry, EngineConfig, Endpoint, NetIp, NetIpKind, ProcessOutput, SockId, TcpSocket,
    Transport,
};
use std::io::Cursor;

// ============================================================================
// MESSAGE POOL EDGE CASES
// ============================================================================

#[test]
fn test_pool_exhaustion_and_reuse() {
    let mut pool = MessagePool::new(2, 8);
    let a = pool.alloc().expect("first");
    let b = pool.alloc().expect("second");
    assert!(pool.alloc().is_none());

    assert!(pool.free(a));
    let c = pool.alloc().expect("reused slot");
    assert_eq!(c.index(), a.index());
    assert_ne!(c, a, "reused slot must get a new generation");

    // Stale handle is rejected everywhere
    assert!(pool.get(a).is_none());
    assert!(!pool.free(a));
    assert!(pool.commit(a, 1).is_err());
    assert!(pool.free(b) && pool.free(c));
    assert_eq!(pool.available(), 2);
}

#[test]
fn test_write_exactly_capacity() {
    let mut pool = MessagePool::new(1, 8);
    let id = pool.alloc().unwrap();
    pool.write(id, &[1u8; 8]).expect("exact capacity fits");
    assert_eq!(pool.get(id).unwrap().size(), 8);

    let err = pool.write(id, &[1u8; 9]).unwrap_err();
    assert!(matches!(err, ProtocolError::OversizedFrame(9)));
}

#[test]
fn test_queued_message_cannot_be_freed() {
    let mut pool = MessagePool::new(2, 8);
    let mut queue = MessageQueue::new();
    let id = pool.alloc().unwrap();
    assert!(queue.push_back(&mut pool, id));
    assert!(!queue.push_back(&mut pool, id), "double enqueue");
    assert!(!pool.free(id));

    assert_eq!(queue.pop_front(&mut pool), Some(id));
    assert!(pool.free(id));
}

#[test]
fn test_zero_sized_pool() {
    let mut pool = MessagePool::new(0, 64);
    assert!(pool.alloc().is_none());
    assert!(pool.is_empty());
}

// ============================================================================
// FRAMING EDGE CASES
// ============================================================================

#[test]
fn test_reader_starves_without_losing_frame() {
    let mut pool = MessagePool::new(1, 16);
    let hog = pool.alloc().unwrap();

    let mut bytes = 3u32.to_be_bytes().to_vec();
    bytes.extend_from_slice(b"abc");
    let mut stream = Cursor::new(bytes);
    let mut reader = FrameReader::new();

    assert_eq!(reader.read(&mut stream, &mut pool).unwrap(), ReadProgress::Starved);
    assert!(reader.in_progress());

    pool.free(hog);
    match reader.read(&mut stream, &mut pool).unwrap() {
        ReadProgress::Received(id) => assert_eq!(pool.get(id).unwrap().payload(), b"abc"),
        other => panic!("expected a frame, got {other:?}"),
    }
}

#[test]
fn test_reader_end_of_stream_mid_header() {
    let mut pool = MessagePool::new(1, 16);
    let mut stream = Cursor::new(vec![0u8; FRAME_HEADER_SIZE - 1]);
    let mut reader = FrameReader::new();

    let err = reader.read(&mut stream, &mut pool).unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[test]
fn test_reader_end_of_stream_mid_body_discards() {
    let mut pool = MessagePool::new(1, 16);
    let mut bytes = 10u32.to_be_bytes().to_vec();
    bytes.extend_from_slice(b"half");
    let mut stream = Cursor::new(bytes);
    let mut reader = FrameReader::new();

    assert!(reader.read(&mut stream, &mut pool).is_err());
    assert_eq!(pool.in_use(), 1);
    reader.discard(&mut pool);
    assert_eq!(pool.in_use(), 0);
    assert!(!reader.in_progress());
}

// ============================================================================
// HANDSHAKE EDGE CASES
// ============================================================================

#[test]
fn test_identity_payload_size_is_fixed() {
    let payload = encode_identity(&SockId::derive("x"), &NetIp::v4([1, 2, 3, 4], 5));
    assert_eq!(payload.len(), HANDSHAKE_PAYLOAD_SIZE);

    assert!(decode_identity(&payload[..HANDSHAKE_PAYLOAD_SIZE - 1]).is_err());
    let mut long = payload.to_vec();
    long.push(0);
    assert!(decode_identity(&long).is_err());
}

#[test]
fn test_identity_unknown_family() {
    let mut payload = encode_identity(&SockId::derive("x"), &NetIp::NONE);
    // Family field follows the 32-byte identity
    payload[32] = 0;
    payload[33] = 9;
    let err = decode_identity(&payload).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidNetIp(9)));
}

#[test]
fn test_verify_identity_rules() {
    let own = SockId::derive("me");
    let other = SockId::derive("you");

    assert!(verify_identity(&own, None, &other).is_ok());
    assert!(verify_identity(&own, Some(&SockId::UNSPECIFIED), &other).is_ok());
    assert!(verify_identity(&own, Some(&other), &other).is_ok());
    assert!(verify_identity(&own, None, &own).is_err());

    let err = verify_identity(&own, Some(&SockId::derive("them")), &other).unwrap_err();
    assert!(matches!(err, ProtocolError::IdentityMismatch { .. }));
    assert!(err.is_protocol_violation());
}

// ============================================================================
// ADDRESSING EDGE CASES
// ============================================================================

#[test]
fn test_netip_families() {
    assert_eq!(NetIp::NONE.kind(), NetIpKind::None);
    assert!(NetIp::NONE.to_socket_addr().is_none());
    assert!(NetIp::v4([0, 0, 0, 0], 80).is_unspecified());
    assert!(!NetIp::v4([127, 0, 0, 1], 80).is_unspecified());

    let v6 = NetIp::resolve("::1", 9000).expect("literal v6");
    assert_eq!(v6.kind(), NetIpKind::V6);
    assert_eq!(v6.port(), 9000);
}

#[test]
fn test_resolve_failure() {
    assert!(NetIp::resolve("unresolvable.invalid", 1).is_err());
}

#[test]
fn test_registry_zero_and_odd_buckets() {
    assert!(AddressRegistry::with_buckets(0).is_err());
    assert!(AddressRegistry::with_buckets(3).is_err());
    let registry = AddressRegistry::with_buckets(1).expect("single bucket");
    assert!(registry.is_empty());
}

#[test]
fn test_registry_upsert_replaces() {
    let mut registry = AddressRegistry::new();
    let id = SockId::derive("mover");
    registry.upsert(&id, &Endpoint::from(NetIp::v4([10, 0, 0, 1], 1)));
    registry.upsert(&id, &Endpoint::from(NetIp::v4([10, 0, 0, 2], 2)));

    assert_eq!(registry.len(), 1);
    let netip = registry.get(&id).unwrap().to_netip().unwrap();
    assert_eq!(netip, NetIp::v4([10, 0, 0, 2], 2));
}

// ============================================================================
// ENGINE EDGE CASES
// ============================================================================

#[test]
fn test_engine_rejects_capacity_below_identity() {
    let result = TcpSocket::new(EngineConfig {
        message_capacity: HANDSHAKE_PAYLOAD_SIZE - 1,
        ..EngineConfig::default()
    });
    assert!(matches!(result, Err(ProtocolError::ConfigError(_))));

    let exact = TcpSocket::new(EngineConfig {
        message_capacity: HANDSHAKE_PAYLOAD_SIZE,
        message_pool_size: 1,
        ..EngineConfig::default()
    });
    assert!(exact.is_ok());
}

#[cfg(target_pointer_width = "64")]
#[test]
fn test_engine_rejects_capacity_beyond_frame_length() {
    // Checked before the pool is allocated
    let result = TcpSocket::new(EngineConfig {
        message_capacity: u32::MAX as usize + 1,
        ..EngineConfig::default()
    });
    assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
}

#[test]
fn test_engine_handles_stale_message_ids() {
    let mut engine = TcpSocket::new(EngineConfig {
        message_pool_size: 2,
        message_capacity: 64,
        ..EngineConfig::default()
    })
    .unwrap();

    let id = engine.alloc_msg().unwrap();
    assert!(engine.free_msg(id));
    assert!(!engine.free_msg(id));
    assert!(engine.message(id).is_none());
    assert!(engine.message_buffer(id).is_none());
    assert!(engine.commit_msg(id, 1).is_err());
}

#[test]
fn test_commit_through_buffer() {
    let mut engine = TcpSocket::new(EngineConfig {
        message_pool_size: 1,
        message_capacity: 64,
        ..EngineConfig::default()
    })
    .unwrap();

    let id = engine.alloc_msg().unwrap();
    engine.message_buffer(id).unwrap()[..5].copy_from_slice(b"hello");
    engine.commit_msg(id, 5).unwrap();
    assert_eq!(engine.message(id).unwrap().payload(), b"hello");
    assert!(engine.commit_msg(id, 65).is_err());
}

#[test]
fn test_remove_unknown_peer() {
    let mut engine = TcpSocket::new(EngineConfig::default()).unwrap();
    let peer = engine.add_peer(SockId::derive("brief"), NetIp::NONE);
    assert!(engine.remove_peer(peer).is_some());
    assert!(engine.remove_peer(peer).is_none());
    assert!(engine.peer(peer).is_none());
}

#[test]
fn test_add_peer_merges_known_identity() {
    let mut engine = TcpSocket::new(EngineConfig::default()).unwrap();
    let id = SockId::derive("merge");
    let first = engine.add_peer(id, NetIp::v4([10, 0, 0, 1], 1));
    let second = engine.add_peer(id, NetIp::v4([10, 0, 0, 2], 2));
    assert_eq!(first, second);
    assert_eq!(*engine.peer(first).unwrap().netip(), NetIp::v4([10, 0, 0, 2], 2));

    // Unknown identities never merge
    let a = engine.add_peer(SockId::UNSPECIFIED, NetIp::NONE);
    let b = engine.add_peer(SockId::UNSPECIFIED, NetIp::NONE);
    assert_ne!(a, b);
}

#[test]
fn test_open_on_unbindable_address() {
    let mut engine = TcpSocket::new(EngineConfig {
        bind_address: "192.0.2.1".into(),
        ..EngineConfig::default()
    })
    .unwrap();
    // TEST-NET-1 is never a local address
    assert!(engine.open(0, "nowhere", SockId::random(), 4).is_err());
    assert!(!engine.is_open());
    assert!(engine.process(&mut ProcessOutput::new()).is_err());
}
