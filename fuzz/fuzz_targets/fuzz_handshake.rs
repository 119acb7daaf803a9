#![no_main]

use libfuzzer_sys::fuzz_target;
use peerlink::protocol::handshake::{decode_identity, encode_identity};

fuzz_target!(|data: &[u8]| {
    // Fuzz identity payload decoding
    if let Ok((sockid, netip)) = decode_identity(data) {
        // Anything that decodes must re-encode to a payload that decodes the same
        let payload = encode_identity(&sockid, &netip);
        let again = decode_identity(&payload).expect("re-encoded payload decodes");
        assert_eq!(again, (sockid, netip));
    }
});
