//! Splits the bus byte stream into complete JSON objects.
//!
//! The protocol carries no length prefix: a frame ends where the braces of a
//! top-level object balance. The scanner tracks string literals and escapes
//! so that braces inside string values do not move the depth counter.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{trace, warn};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Decoder yielding the raw bytes of each balanced top-level JSON object.
///
/// Scan state persists across calls, so bytes already inspected are never
/// scanned twice while a frame is still arriving.
#[derive(Debug)]
pub struct JsonObjectCodec {
    max_frame_bytes: usize,
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonObjectCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            scanned: 0,
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }
}

impl Default for JsonObjectCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for JsonObjectCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if self.depth == 0 {
            // Between objects: skip newlines and anything else up to the next '{'.
            match buf.iter().position(|&b| b == b'{') {
                Some(0) => {}
                Some(skip) => {
                    trace!(bytes = skip, "Skipping bytes between frames");
                    buf.advance(skip);
                }
                None => {
                    buf.clear();
                    return Ok(None);
                }
            }
        }

        while self.scanned < buf.len() {
            let b = buf[self.scanned];
            self.scanned += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let frame = buf.split_to(self.scanned).freeze();
                        self.reset();
                        return Ok(Some(frame));
                    }
                }
                _ => {}
            }
        }

        if buf.len() > self.max_frame_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame exceeds {} bytes without closing brace",
                    self.max_frame_bytes
                ),
            ));
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if !buf.is_empty() {
            warn!(bytes = buf.len(), "Discarding incomplete frame at end of stream");
            buf.clear();
            self.reset();
        }
        Ok(None)
    }
}
