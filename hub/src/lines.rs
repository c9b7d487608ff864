//! Line codec for chat sessions.
//!
//! `LinesCodec` fails the whole stream on a line over its limit. Here such a
//! line is dropped as it arrives and reported once as [`ChatLine::Overlong`],
//! and decoding carries on with the next line.

use bytes::BytesMut;
use roomcast_rt::tasks::codec::{Decoder, Encoder, LinesCodecError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLine {
    Text(String),
    Overlong,
}

#[derive(Debug, Clone)]
pub struct ChatCodec {
    max_len: usize,
    /// Set while the rest of an overlong line is being dropped
    discarding: bool,
    /// Prefix of the buffer already known to hold no newline
    scanned: usize,
}

impl ChatCodec {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            discarding: false,
            scanned: 0,
        }
    }

    fn line(&self, raw: &[u8]) -> ChatLine {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.len() > self.max_len {
            return ChatLine::Overlong;
        }
        ChatLine::Text(String::from_utf8_lossy(raw).into_owned())
    }
}

impl Decoder for ChatCodec {
    type Item = ChatLine;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ChatLine>, LinesCodecError> {
        let newline = buf[self.scanned..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| self.scanned + offset);
        match newline {
            Some(at) => {
                self.scanned = 0;
                let raw = buf.split_to(at + 1);
                if std::mem::take(&mut self.discarding) {
                    return Ok(Some(ChatLine::Overlong));
                }
                Ok(Some(self.line(&raw[..at])))
            }
            // One byte of slack for a trailing '\r'
            None if self.discarding || buf.len() > self.max_len + 1 => {
                buf.clear();
                self.scanned = 0;
                self.discarding = true;
                Ok(None)
            }
            None => {
                self.scanned = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<ChatLine>, LinesCodecError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return Ok(Some(ChatLine::Overlong));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let raw = buf.split();
        Ok(Some(self.line(&raw)))
    }
}

impl Encoder<String> for ChatCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), LinesCodecError> {
        buf.reserve(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b"\n");
        Ok(())
    }
}
