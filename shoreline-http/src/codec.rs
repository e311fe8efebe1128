//! Incremental HTTP/1.1 request decoding.

use bytes::Bytes;

use crate::cookie::parse_cookie_header;
use crate::error::HttpError;
use crate::request::Request;

const MAX_HEADERS: usize = 64;
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Accumulating request decoder; one per connection.
///
/// Feed raw transport bytes, then drain decoded requests. Partial heads
/// and bodies stay buffered until the rest arrives.
#[derive(Default)]
pub struct RequestDecoder {
    buffer: Vec<u8>,
}

impl RequestDecoder {
    pub fn new() -> RequestDecoder {
        RequestDecoder::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Decode the next complete request out of the buffer, or `None` if
    /// more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<Request>, HttpError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut headers);

        let head_len = match parsed
            .parse(&self.buffer)
            .map_err(|e| HttpError::Parse(e.to_string()))?
        {
            httparse::Status::Complete(head_len) => head_len,
            httparse::Status::Partial => {
                if self.buffer.len() > MAX_HEAD_BYTES {
                    return Err(HttpError::HeadTooLarge(self.buffer.len()));
                }
                return Ok(None);
            }
        };

        if head_len > MAX_HEAD_BYTES {
            return Err(HttpError::HeadTooLarge(head_len));
        }

        let method = parsed
            .method
            .ok_or_else(|| HttpError::Parse("missing method".into()))?
            .parse()?;
        let path = parsed
            .path
            .ok_or_else(|| HttpError::Parse("missing path".into()))?;
        let (resource, query) = match path.split_once('?') {
            Some((resource, query)) => (resource.to_string(), Some(query.to_string())),
            None => (path.to_string(), None),
        };

        let mut header_vec = Vec::with_capacity(parsed.headers.len());
        let mut cookies = Vec::new();
        let mut content_length = 0usize;
        for header in parsed.headers.iter() {
            let value = std::str::from_utf8(header.value)
                .map_err(|_| HttpError::Parse("header value is not valid UTF-8".into()))?;
            if header.name.eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| HttpError::Parse("invalid content-length".into()))?;
            }
            if header.name.eq_ignore_ascii_case("cookie") {
                cookies.extend(parse_cookie_header(value));
            }
            header_vec.push((header.name.to_string(), value.to_string()));
        }

        let total = head_len + content_length;
        if self.buffer.len() < total {
            // Head is complete but the body is still in flight.
            return Ok(None);
        }

        let body = Bytes::copy_from_slice(&self.buffer[head_len..total]);
        self.buffer.drain(..total);

        Ok(Some(Request::new(
            method, resource, query, header_vec, cookies, body,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    #[test]
    fn decodes_a_simple_get() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"GET /ready?probe=1 HTTP/1.1\r\nHost: localhost\r\n\r\n");

        let request = decoder.decode().unwrap().unwrap();
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.resource(), "/ready");
        assert_eq!(request.query(), Some("probe=1"));
        assert_eq!(request.header("host"), Some("localhost"));
        assert!(request.body().is_empty());

        // Buffer fully consumed.
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn accumulates_across_feeds() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"POST /record/hits HTTP/1.1\r\nContent-Le");
        assert!(decoder.decode().unwrap().is_none());

        decoder.feed(b"ngth: 4\r\n\r\nbo");
        assert!(decoder.decode().unwrap().is_none());

        decoder.feed(b"dy");
        let request = decoder.decode().unwrap().unwrap();
        assert_eq!(request.method(), Method::Post);
        assert_eq!(&request.body()[..], b"body");
    }

    #[test]
    fn decodes_pipelined_requests() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");

        assert_eq!(decoder.decode().unwrap().unwrap().resource(), "/a");
        assert_eq!(decoder.decode().unwrap().unwrap().resource(), "/b");
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn extracts_request_cookies() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"GET /auth HTTP/1.1\r\nCookie: session=abc; lang=fr\r\n\r\n");

        let request = decoder.decode().unwrap().unwrap();
        assert_eq!(request.cookie("session").unwrap().value, "abc");
        assert_eq!(request.cookie("lang").unwrap().value, "fr");
    }

    #[test]
    fn rejects_oversized_head() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"GET / HTTP/1.1\r\n");
        decoder.feed(&vec![b'a'; MAX_HEAD_BYTES + 1]);
        assert!(matches!(
            decoder.decode(),
            Err(HttpError::HeadTooLarge(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        let mut decoder = RequestDecoder::new();
        decoder.feed(b"\0\0\0not http\r\n\r\n");
        assert!(matches!(decoder.decode(), Err(HttpError::Parse(_))));
    }
}
