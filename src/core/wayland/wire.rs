//! Wire framing for the Wayland protocol.
//!
//! Every message is an 8-byte header (object id u32, opcode u16, total
//! size in bytes including the header u16) followed by
//! opcode-specific arguments. Integers are host-endian; strings and byte
//! arrays carry a 32-bit length and are zero-padded to a 4-byte boundary.
//!
//! Decoding is bounds-checked throughout: every length the compositor
//! declares is validated against the bytes actually buffered before
//! anything is copied.

use crate::core::errors::{DisplayError, Result};
use crate::core::wayland::HEADER_SIZE;

/// Round up to the next 4-byte boundary.
pub const fn round_up4(n: usize) -> usize {
    (n + 3) & !3
}

/// The fixed per-message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub object_id: u32,
    pub opcode: u16,
    /// Total message size in bytes, header included.
    pub size: usize,
}

impl MessageHeader {
    /// Decode a header from the front of `data`.
    ///
    /// `data` must hold the whole message: a declared size larger than the
    /// buffered bytes means the read split a message, which this transport
    /// does not support.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DisplayError::framing(format!(
                "{} bytes left, header needs {}",
                data.len(),
                HEADER_SIZE
            )));
        }

        let object_id = u32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
        let opcode = u16::from_ne_bytes([data[4], data[5]]);
        let size = u16::from_ne_bytes([data[6], data[7]]) as usize;

        if size < HEADER_SIZE {
            return Err(DisplayError::framing(format!(
                "declared size {size} smaller than the header"
            )));
        }
        if size > data.len() {
            return Err(DisplayError::framing(format!(
                "declared size {size} exceeds the {} buffered bytes",
                data.len()
            )));
        }

        Ok(Self {
            object_id,
            opcode,
            size,
        })
    }
}

/// Bounds-checked argument decoder over one message payload.
pub struct MessageReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn uint(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn int(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A protocol string: u32 length including the nul terminator, then the
    /// bytes, padded to a 4-byte boundary. A zero length is the null string.
    pub fn string(&mut self) -> Result<String> {
        let len = self.uint()? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = self.take(round_up4(len))?;
        if bytes[len - 1] != 0 {
            return Err(DisplayError::framing(
                "string argument is not nul-terminated",
            ));
        }
        Ok(String::from_utf8_lossy(&bytes[..len - 1]).into_owned())
    }

    /// A protocol byte array: u32 length, bytes, padded to 4.
    pub fn array(&mut self) -> Result<&'a [u8]> {
        let len = self.uint()? as usize;
        let bytes = self.take(round_up4(len))?;
        Ok(&bytes[..len])
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(DisplayError::framing(format!(
                "argument needs {n} bytes, payload has {}",
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

/// Request builder. Reserves the header up front and patches the final
/// size on `finish`.
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new(object_id: u32, opcode: u16) -> Self {
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(&object_id.to_ne_bytes());
        buf.extend_from_slice(&opcode.to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        Self { buf }
    }

    pub fn uint(mut self, v: u32) -> Self {
        self.buf.extend_from_slice(&v.to_ne_bytes());
        self
    }

    pub fn int(mut self, v: i32) -> Self {
        self.buf.extend_from_slice(&v.to_ne_bytes());
        self
    }

    /// Write a string argument: length including nul, bytes, nul, padding.
    pub fn string(mut self, s: &str) -> Self {
        let len = s.len() + 1;
        self.buf.extend_from_slice(&(len as u32).to_ne_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
        self
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        let size = self.buf.len();
        if size > u16::MAX as usize {
            return Err(DisplayError::framing(format!(
                "message of {size} bytes exceeds the u16 size field"
            )));
        }
        self.buf[6..8].copy_from_slice(&(size as u16).to_ne_bytes());
        Ok(self.buf)
    }
}
