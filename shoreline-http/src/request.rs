//! HTTP request model.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::cookie::Cookie;
use crate::error::HttpError;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }
}

impl FromStr for Method {
    type Err = HttpError;

    fn from_str(s: &str) -> Result<Method, HttpError> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            "PATCH" => Ok(Method::Patch),
            other => Err(HttpError::Method(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded HTTP request.
#[derive(Debug)]
pub struct Request {
    method: Method,
    resource: String,
    query: Option<String>,
    headers: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    body: Bytes,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        resource: String,
        query: Option<String>,
        headers: Vec<(String, String)>,
        cookies: Vec<Cookie>,
        body: Bytes,
    ) -> Request {
        Request {
            method,
            resource,
            query,
            headers,
            cookies,
            body,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The request path, without the query string.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Headers as (name, value) pairs, in wire order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header value matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_from_str() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
        assert!(matches!(
            "get".parse::<Method>(),
            Err(HttpError::Method(_))
        ));
        assert!("".parse::<Method>().is_err());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let request = Request::new(
            Method::Get,
            "/".into(),
            None,
            vec![("Content-Type".into(), "text/plain".into())],
            Vec::new(),
            Bytes::new(),
        );
        assert_eq!(request.header("content-type"), Some("text/plain"));
        assert_eq!(request.header("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(request.header("accept"), None);
    }
}
