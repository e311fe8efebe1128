//! Response codes and the per-request response writer.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use shoreline::{Io, Peer};

use crate::cookie::{Cookie, CookieJar};
use crate::error::HttpError;

/// Response status code with its reason phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Ok = 200,
    Created = 201,
    NoContent = 204,
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    RequestTimeout = 408,
    PayloadTooLarge = 413,
    InternalServerError = 500,
}

impl Code {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn reason(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Created => "Created",
            Code::NoContent => "No Content",
            Code::BadRequest => "Bad Request",
            Code::Unauthorized => "Unauthorized",
            Code::Forbidden => "Forbidden",
            Code::NotFound => "Not Found",
            Code::RequestTimeout => "Request Timeout",
            Code::PayloadTooLarge => "Payload Too Large",
            Code::InternalServerError => "Internal Server Error",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

/// Writes one response to one peer.
///
/// Borrowed from the dispatch turn; `send` consumes the writer, so a
/// handler can respond at most once.
pub struct ResponseWriter<'a> {
    io: &'a mut Io,
    peer: &'a Arc<Peer>,
    headers: Vec<(String, String)>,
    cookies: CookieJar,
    sent: &'a Cell<bool>,
}

impl<'a> ResponseWriter<'a> {
    pub(crate) fn new(io: &'a mut Io, peer: &'a Arc<Peer>, sent: &'a Cell<bool>) -> Self {
        ResponseWriter {
            io,
            peer,
            headers: Vec::new(),
            cookies: CookieJar::default(),
            sent,
        }
    }

    /// Append a response header.
    pub fn set_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Cookies to attach as `Set-Cookie` lines.
    pub fn cookies(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }

    /// Serialize and send the response. The bytes go to the transport,
    /// queued behind any earlier response still draining to this peer so
    /// pipelined responses keep request order.
    pub fn send(self, code: Code, body: impl AsRef<[u8]>) -> Result<(), HttpError> {
        let bytes = encode_response(code, &self.headers, self.cookies.as_slice(), body.as_ref());
        crate::conn::send(self.io, self.peer, bytes)?;
        self.sent.set(true);
        Ok(())
    }
}

fn encode_response(
    code: Code,
    headers: &[(String, String)],
    cookies: &[Cookie],
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(format!("HTTP/1.1 {code}\r\n").as_bytes());
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    for cookie in cookies {
        out.extend_from_slice(format!("Set-Cookie: {cookie}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    out
}
