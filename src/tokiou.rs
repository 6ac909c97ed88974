use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec;
use crate::error::{Error, Result};
use crate::ldap::Message;

const READ_CHUNK: usize = 4096;

/// Reassembles LDAPMessages from a byte stream.
pub struct DecodeContext {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl DecodeContext {
    pub async fn get_message<R: AsyncRead + Unpin>(&mut self, s: &mut R) -> Result<Message> {
        loop {
            if let Ok(size) = codec::frame_len(&self.buffer) {
                if size > self.max_frame_size {
                    return Err(Error::FrameTooLarge {
                        size,
                        max: self.max_frame_size,
                    });
                }
            }
            match codec::parse_message(&self.buffer) {
                Ok((parsed, parsed_size)) => {
                    self.buffer.drain(..parsed_size);
                    return Ok(parsed);
                }
                Err(e) if e.is_incomplete() => {
                    self.buffer.reserve(READ_CHUNK);
                    let res = s.read_buf(&mut self.buffer).await?;
                    if res == 0 {
                        return Err(Error::ConnectionClosed);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    /// Bytes received but not yet returned as a message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
