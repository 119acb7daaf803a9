#![no_main]

use libfuzzer_sys::fuzz_target;
use peerlink::core::frame::{FrameReader, ReadProgress};
use peerlink::core::message::MessagePool;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes to the frame reader until it stops
    let mut pool = MessagePool::new(4, 1024);
    let mut reader = FrameReader::new();
    let mut stream = Cursor::new(data);

    loop {
        match reader.read(&mut stream, &mut pool) {
            Ok(ReadProgress::Received(id)) => {
                let size = pool.get(id).map_or(0, |m| m.size());
                assert!(size <= 1024);
                pool.free(id);
            }
            Ok(ReadProgress::WouldBlock) | Ok(ReadProgress::Starved) | Err(_) => break,
        }
    }
    reader.discard(&mut pool);
    assert_eq!(pool.in_use(), 0);
});
