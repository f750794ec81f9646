//! Newline-delimited framing.
//!
//! One request line in, one response line out. The whole trimmed request
//! line is the cache key. Useful for simple lookup protocols and for
//! exercising the proxy without HTTP.

use std::time::Duration;

use bytes::Bytes;

use crate::cache::CacheKey;
use crate::error::ForwardError;
use crate::protocol::{FrameError, FramedRequest, Framing, ResponseStatus};

#[derive(Debug, Clone)]
pub struct LineFraming {
    max_line: usize,
}

impl LineFraming {
    pub fn new(max_line: usize) -> Self {
        Self { max_line }
    }
}

impl Framing for LineFraming {
    fn parse_request(&self, buf: &[u8]) -> Result<Option<(FramedRequest, usize)>, FrameError> {
        let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
            if buf.len() > self.max_line {
                return Err(FrameError::TooLarge { limit: self.max_line });
            }
            return Ok(None);
        };

        let consumed = newline + 1;
        if consumed > self.max_line {
            return Err(FrameError::TooLarge { limit: self.max_line });
        }

        let line = std::str::from_utf8(&buf[..newline])
            .map_err(|_| FrameError::Malformed("request line is not UTF-8".into()))?
            .trim();
        if line.is_empty() {
            return Err(FrameError::Malformed("empty request line".into()));
        }

        let request = FramedRequest {
            raw: Bytes::copy_from_slice(&buf[..consumed]),
            key: CacheKey::new(line),
            cacheable: true,
            keep_alive: true,
            bodiless_response: false,
        };
        Ok(Some((request, consumed)))
    }

    fn response_status(&self, _request: &FramedRequest, buf: &[u8], eof: bool) -> ResponseStatus {
        match buf.iter().position(|&b| b == b'\n') {
            Some(newline) => ResponseStatus::Complete(newline + 1),
            None if eof => ResponseStatus::Malformed,
            None => ResponseStatus::Incomplete,
        }
    }

    fn response_ttl(&self, response: &[u8], default_ttl: Duration) -> Option<Duration> {
        if response.starts_with(b"-ERR") {
            None
        } else {
            Some(default_ttl)
        }
    }

    fn error_response(&self, error: &ForwardError) -> Bytes {
        Bytes::from(format!("-ERR {}\r\n", error.as_str()))
    }

    fn reject_response(&self, error: &FrameError) -> Option<Bytes> {
        Some(Bytes::from(format!("-ERR {error}\r\n")))
    }
}
