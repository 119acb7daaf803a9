//! # Message Framing
//!
//! Length-prefixed framing over a non-blocking byte stream.
//!
//! ```text
//! [Length(4, big-endian)] [Payload(Length)]
//! ```
//!
//! Both halves keep a cursor so a frame can be spread over any number of
//! partial reads or writes. They are generic over [`Read`]/[`Write`] so the
//! same code drives mio sockets and in-memory test streams.
//!
//! - [`FrameWriter`] sends the head of an outbound [`MessageQueue`], using a
//!   vectored write for header and payload while the header is incomplete.
//! - [`FrameReader`] takes a message from the pool as soon as the length is
//!   known and fills it directly; nothing is over-read past the frame.

use std::io::{ErrorKind, IoSlice, Read, Write};

use crate::core::message::{MessageId, MessagePool, MessageQueue};
use crate::error::{ProtocolError, Result};

/// Size of the frame length prefix
pub const FRAME_HEADER_SIZE: usize = 4;

/// Outcome of one [`FrameWriter::write`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// A whole message went out and was popped from the queue
    Sent(MessageId),
    /// The socket stopped accepting bytes
    Blocked,
    /// Nothing left to send
    Drained,
}

/// Outcome of one [`FrameReader::read`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    /// A complete frame was read into this message
    Received(MessageId),
    /// No more bytes available right now
    WouldBlock,
    /// A frame is pending but the message pool is empty
    Starved,
}

/// Outbound framing cursor
#[derive(Debug, Default, Clone)]
pub struct FrameWriter {
    offset: usize,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the current head message already written, header included
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Push the head of `queue` into `stream`.
    ///
    /// A fully written message is unlinked from the queue and returned; the
    /// caller decides whether to free it.
    ///
    /// # Errors
    /// Socket errors other than `WouldBlock`/`Interrupted`, `ConnectionClosed`
    /// if the stream accepts zero bytes.
    pub fn write<W: Write>(
        &mut self,
        stream: &mut W,
        pool: &mut MessagePool,
        queue: &mut MessageQueue,
    ) -> Result<WriteProgress> {
        let Some(id) = queue.front(pool) else {
            self.offset = 0;
            return Ok(WriteProgress::Drained);
        };

        {
            let message = pool.get(id).ok_or(ProtocolError::InvalidHandle)?;
            let payload = message.payload();
            let header = u32::try_from(payload.len())
                .map_err(|_| ProtocolError::OversizedFrame(payload.len()))?
                .to_be_bytes();
            let total = FRAME_HEADER_SIZE + payload.len();

            while self.offset < total {
                let written = if self.offset < FRAME_HEADER_SIZE {
                    let slices = [
                        IoSlice::new(&header[self.offset..]),
                        IoSlice::new(payload),
                    ];
                    stream.write_vectored(&slices)
                } else {
                    stream.write(&payload[self.offset - FRAME_HEADER_SIZE..])
                };

                match written {
                    Ok(0) => return Err(ProtocolError::ConnectionClosed),
                    Ok(n) => self.offset += n,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        return Ok(WriteProgress::Blocked)
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.offset = 0;
        queue.pop_front(pool);
        Ok(WriteProgress::Sent(id))
    }
}

/// Inbound framing cursor
#[derive(Debug, Default, Clone)]
pub struct FrameReader {
    header: [u8; FRAME_HEADER_SIZE],
    header_filled: usize,
    message: Option<MessageId>,
    body_filled: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a frame has been started but not completed
    pub fn in_progress(&self) -> bool {
        self.header_filled > 0
    }

    fn frame_len(&self) -> usize {
        u32::from_be_bytes(self.header) as usize
    }

    /// Read at most one frame from `stream`.
    ///
    /// # Errors
    /// `OversizedFrame` when the announced length exceeds the pooled message
    /// capacity, `ConnectionClosed` on end of stream, and socket errors other
    /// than `WouldBlock`/`Interrupted`.
    pub fn read<R: Read>(&mut self, stream: &mut R, pool: &mut MessagePool) -> Result<ReadProgress> {
        while self.header_filled < FRAME_HEADER_SIZE {
            match stream.read(&mut self.header[self.header_filled..]) {
                Ok(0) => return Err(ProtocolError::ConnectionClosed),
                Ok(n) => self.header_filled += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadProgress::WouldBlock),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let len = self.frame_len();
        if len > pool.message_capacity() {
            return Err(ProtocolError::OversizedFrame(len));
        }

        let id = match self.message {
            Some(id) => id,
            None => match pool.alloc() {
                Some(id) => {
                    self.message = Some(id);
                    self.body_filled = 0;
                    id
                }
                None => return Ok(ReadProgress::Starved),
            },
        };

        while self.body_filled < len {
            let buf = pool.buffer_mut(id).ok_or(ProtocolError::InvalidHandle)?;
            match stream.read(&mut buf[self.body_filled..len]) {
                Ok(0) => return Err(ProtocolError::ConnectionClosed),
                Ok(n) => self.body_filled += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadProgress::WouldBlock),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        pool.commit(id, len)?;
        self.header_filled = 0;
        self.body_filled = 0;
        self.message = None;
        Ok(ReadProgress::Received(id))
    }

    /// Drop any partially read frame, returning its message to the pool
    pub fn discard(&mut self, pool: &mut MessagePool) {
        if let Some(id) = self.message.take() {
            pool.free(id);
        }
        self.header_filled = 0;
        self.body_filled = 0;
    }
}
