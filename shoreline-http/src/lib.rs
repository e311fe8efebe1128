//! HTTP/1.1 server layer for the shoreline reactor.
//!
//! Raw transport bytes are decoded into requests per peer, matched
//! against URL patterns compiled to fragment sequences (`/record/:name/
//! :value?`, `/static/*`), and dispatched to route handlers with typed
//! parameter extraction. Responses go back out through the transport's
//! buffered write path.
//!
//! ```rust,no_run
//! use shoreline_http::{Code, Endpoint, Router};
//!
//! let mut router = Router::new();
//! router.get("/value/:name", |request, response| {
//!     let name: String = request.param(":name").unwrap().parse().unwrap();
//!     let _ = response.send(Code::Ok, name);
//! });
//!
//! let (shutdown, handles) = Endpoint::new("127.0.0.1:9080".parse().unwrap())
//!     .serve(router)
//!     .unwrap();
//! for h in handles {
//!     h.join().unwrap().unwrap();
//! }
//! # let _ = shutdown;
//! ```

pub(crate) mod conn;

pub mod codec;
pub mod cookie;
pub mod error;
pub mod request;
pub mod response;
pub mod router;
pub mod server;

/// Incremental HTTP/1.1 request decoder.
pub use codec::RequestDecoder;
/// A name/value cookie.
pub use cookie::Cookie;
/// Response cookie collection.
pub use cookie::CookieJar;
/// HTTP-layer errors.
pub use error::HttpError;
/// Request method.
pub use request::Method;
/// A decoded HTTP request.
pub use request::Request;
/// Response status code.
pub use response::Code;
/// Per-request response writer.
pub use response::ResponseWriter;
/// Method-keyed route table.
pub use router::Router;
/// A captured route parameter.
pub use router::TypedParam;
/// An HTTP server endpoint.
pub use server::Endpoint;
