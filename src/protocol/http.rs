//! HTTP/1.x framing.
//!
//! # Design Decisions
//! - Request bodies are delimited by `Content-Length` only; chunked request
//!   bodies are rejected
//! - Responses are delimited by `Content-Length`, chunked encoding, or
//!   connection close, in that order of preference
//! - Close-delimited responses get a `Content-Length` before they are cached
//!   or relayed, since the client connection may stay open
//! - Only bodiless GET/HEAD requests without credentials are cacheable
//! - A response is stored only for status 200 and a cache-friendly
//!   `Cache-Control`; `s-maxage`/`max-age` override the default TTL

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use httparse::{Status, EMPTY_HEADER};

use crate::cache::CacheKey;
use crate::error::{FailureKind, ForwardError};
use crate::protocol::{FrameError, FramedRequest, Framing, ResponseStatus};

const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone)]
pub struct HttpFraming {
    max_request_bytes: usize,
    /// Lowercased request header names folded into the cache key.
    vary_headers: Vec<String>,
}

impl HttpFraming {
    pub fn new(max_request_bytes: usize, vary_headers: Vec<String>) -> Self {
        Self {
            max_request_bytes,
            vary_headers: vary_headers
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        }
    }
}

fn header_str<'a>(value: &'a [u8], name: &str) -> Result<&'a str, FrameError> {
    std::str::from_utf8(value)
        .map(str::trim)
        .map_err(|_| FrameError::Malformed(format!("{name} header is not UTF-8")))
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

impl Framing for HttpFraming {
    fn parse_request(&self, buf: &[u8]) -> Result<Option<(FramedRequest, usize)>, FrameError> {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let header_len = match req.parse(buf) {
            Ok(Status::Complete(n)) => n,
            Ok(Status::Partial) => {
                if buf.len() > self.max_request_bytes {
                    return Err(FrameError::TooLarge { limit: self.max_request_bytes });
                }
                return Ok(None);
            }
            Err(e) => return Err(FrameError::Malformed(e.to_string())),
        };

        let method = req.method.unwrap_or("GET");
        let target = req.path.unwrap_or("/");
        let version = req.version.unwrap_or(1);

        let mut content_length = 0usize;
        let mut host = String::new();
        let mut connection = "";
        let mut no_store = false;
        let mut has_credentials = false;

        for header in req.headers.iter() {
            let name = header.name;
            if name.eq_ignore_ascii_case("content-length") {
                content_length = header_str(header.value, name)?
                    .parse()
                    .map_err(|_| FrameError::Malformed("invalid Content-Length".into()))?;
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                return Err(FrameError::Unsupported("chunked request bodies"));
            } else if name.eq_ignore_ascii_case("host") {
                host = header_str(header.value, name)?.to_ascii_lowercase();
            } else if name.eq_ignore_ascii_case("connection") {
                connection = header_str(header.value, name)?;
            } else if name.eq_ignore_ascii_case("cache-control") {
                no_store |= has_token(header_str(header.value, name)?, "no-store");
            } else if name.eq_ignore_ascii_case("authorization") {
                has_credentials = true;
            }
        }

        let total = header_len
            .checked_add(content_length)
            .ok_or(FrameError::TooLarge { limit: self.max_request_bytes })?;
        if total > self.max_request_bytes {
            return Err(FrameError::TooLarge { limit: self.max_request_bytes });
        }
        if buf.len() < total {
            return Ok(None);
        }

        let keep_alive = match version {
            0 => has_token(connection, "keep-alive"),
            _ => !has_token(connection, "close"),
        };

        let is_head = method.eq_ignore_ascii_case("HEAD");
        let cacheable = (method.eq_ignore_ascii_case("GET") || is_head)
            && content_length == 0
            && !has_credentials
            && !no_store;

        let mut key = CacheKey::builder(target).method(method).modifier("host", &host);
        for name in &self.vary_headers {
            let values: Vec<&str> = req
                .headers
                .iter()
                .filter(|h| h.name.eq_ignore_ascii_case(name))
                .filter_map(|h| std::str::from_utf8(h.value).ok())
                .map(str::trim)
                .collect();
            if !values.is_empty() {
                key = key.modifier(name, &values.join(","));
            }
        }

        let request = FramedRequest {
            raw: Bytes::copy_from_slice(&buf[..total]),
            key: key.build(),
            cacheable,
            keep_alive,
            bodiless_response: is_head,
        };
        Ok(Some((request, total)))
    }

    fn response_status(&self, request: &FramedRequest, buf: &[u8], eof: bool) -> ResponseStatus {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);

        let header_len = match resp.parse(buf) {
            Ok(Status::Complete(n)) => n,
            Ok(Status::Partial) if eof => return ResponseStatus::Malformed,
            Ok(Status::Partial) => return ResponseStatus::Incomplete,
            Err(_) => return ResponseStatus::Malformed,
        };

        let code = resp.code.unwrap_or(0);
        if (100..200).contains(&code) {
            // Interim responses are not relayed.
            return ResponseStatus::Malformed;
        }
        if request.bodiless_response || code == 204 || code == 304 {
            return ResponseStatus::Complete(header_len);
        }

        let mut content_length = None;
        let mut chunked = false;
        for header in resp.headers.iter() {
            if header.name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = std::str::from_utf8(header.value)
                    .map(|v| has_token(v, "chunked"))
                    .unwrap_or(false);
            } else if header.name.eq_ignore_ascii_case("content-length") {
                match std::str::from_utf8(header.value)
                    .ok()
                    .and_then(|v| v.trim().parse::<usize>().ok())
                {
                    Some(len) => content_length = Some(len),
                    None => return ResponseStatus::Malformed,
                }
            }
        }

        let body = &buf[header_len..];
        if chunked {
            return match chunked_body_len(body) {
                Chunked::Complete(len) => ResponseStatus::Complete(header_len + len),
                Chunked::Incomplete if eof => ResponseStatus::Malformed,
                Chunked::Incomplete => ResponseStatus::Incomplete,
                Chunked::Invalid => ResponseStatus::Malformed,
            };
        }

        match content_length {
            Some(len) if body.len() >= len => ResponseStatus::Complete(header_len + len),
            Some(_) if eof => ResponseStatus::Malformed,
            Some(_) => ResponseStatus::Incomplete,
            None if eof => ResponseStatus::Complete(buf.len()),
            None => ResponseStatus::Incomplete,
        }
    }

    fn finish_response(&self, request: &FramedRequest, response: Bytes) -> Bytes {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);
        let header_len = match resp.parse(&response) {
            Ok(Status::Complete(n)) => n,
            _ => return response,
        };

        let code = resp.code.unwrap_or(0);
        let delimited = request.bodiless_response
            || code == 204
            || code == 304
            || resp.headers.iter().any(|h| {
                h.name.eq_ignore_ascii_case("content-length")
                    || (h.name.eq_ignore_ascii_case("transfer-encoding")
                        && std::str::from_utf8(h.value)
                            .map(|v| has_token(v, "chunked"))
                            .unwrap_or(false))
            });
        if delimited {
            return response;
        }

        // Drop the blank line ending the head; httparse also accepts bare LF.
        let head = &response[..header_len];
        let head_end = if head.ends_with(b"\r\n\r\n") {
            header_len - 2
        } else {
            header_len - 1
        };
        let body_len = response.len() - header_len;
        let mut out = BytesMut::with_capacity(response.len() + 32);
        out.extend_from_slice(&response[..head_end]);
        out.extend_from_slice(format!("Content-Length: {body_len}\r\n\r\n").as_bytes());
        out.extend_from_slice(&response[header_len..]);
        out.freeze()
    }

    fn response_ttl(&self, response: &[u8], default_ttl: Duration) -> Option<Duration> {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);
        if !matches!(resp.parse(response), Ok(Status::Complete(_))) || resp.code != Some(200) {
            return None;
        }

        let mut max_age = None;
        let mut shared_max_age = None;
        for header in resp.headers.iter() {
            if header.name.eq_ignore_ascii_case("set-cookie") {
                return None;
            }
            if !header.name.eq_ignore_ascii_case("cache-control") {
                continue;
            }
            let value = std::str::from_utf8(header.value).ok()?;
            for directive in value.split(',').map(str::trim) {
                let lower = directive.to_ascii_lowercase();
                if matches!(lower.as_str(), "no-store" | "no-cache" | "private") {
                    return None;
                }
                if let Some(secs) = lower.strip_prefix("s-maxage=") {
                    shared_max_age = secs.parse::<u64>().ok();
                } else if let Some(secs) = lower.strip_prefix("max-age=") {
                    max_age = secs.parse::<u64>().ok();
                }
            }
        }

        match shared_max_age.or(max_age) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(default_ttl),
        }
    }

    fn error_response(&self, error: &ForwardError) -> Bytes {
        let (status, reason) = match error {
            ForwardError::NoBackendAvailable => (503, "Service Unavailable"),
            ForwardError::Upstream(FailureKind::Timeout) => (504, "Gateway Timeout"),
            _ => (502, "Bad Gateway"),
        };
        plain_response(status, reason, &format!("{error}\n"), false)
    }

    fn reject_response(&self, error: &FrameError) -> Option<Bytes> {
        let (status, reason) = match error {
            FrameError::TooLarge { .. } => (413, "Payload Too Large"),
            FrameError::Malformed(_) => (400, "Bad Request"),
            FrameError::Unsupported(_) => (501, "Not Implemented"),
        };
        Some(plain_response(status, reason, &format!("{error}\n"), true))
    }
}

fn plain_response(status: u16, reason: &str, body: &str, close: bool) -> Bytes {
    let connection = if close { "Connection: close\r\n" } else { "" };
    Bytes::from(format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nCache-Control: no-store\r\n{connection}\r\n{body}",
        body.len()
    ))
}

enum Chunked {
    Incomplete,
    Complete(usize),
    Invalid,
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Length of a complete chunked body (including trailers) at the front of `body`.
fn chunked_body_len(body: &[u8]) -> Chunked {
    let mut pos = 0;
    loop {
        let Some(line_len) = find_crlf(&body[pos..]) else {
            return Chunked::Incomplete;
        };
        let line = &body[pos..pos + line_len];
        let size_field = line.split(|&b| b == b';').next().unwrap_or(line);
        let size = match std::str::from_utf8(size_field)
            .ok()
            .and_then(|s| usize::from_str_radix(s.trim(), 16).ok())
        {
            Some(size) => size,
            None => return Chunked::Invalid,
        };
        pos += line_len + 2;

        if size == 0 {
            // Trailer section ends with an empty line.
            loop {
                let Some(len) = find_crlf(&body[pos..]) else {
                    return Chunked::Incomplete;
                };
                pos += len + 2;
                if len == 0 {
                    return Chunked::Complete(pos);
                }
            }
        }

        let Some(chunk_end) = pos.checked_add(size).and_then(|p| p.checked_add(2)) else {
            return Chunked::Invalid;
        };
        if body.len() < chunk_end {
            return Chunked::Incomplete;
        }
        if &body[chunk_end - 2..chunk_end] != b"\r\n" {
            return Chunked::Invalid;
        }
        pos = chunk_end;
    }
}
