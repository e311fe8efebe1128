//! URL-pattern routing with typed parameter extraction.
//!
//! Patterns are compiled at registration into fragment sequences:
//! literals, `:name` parameters (optionally trailing `?`), and `*`
//! wildcards. Matching is first-registered-wins per method.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use crate::error::HttpError;
use crate::request::Method;
use crate::response::{Code, ResponseWriter};

/// A captured (name, raw value) pair convertible to scalar types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedParam {
    name: String,
    value: String,
}

impl TypedParam {
    fn new(name: impl Into<String>, value: impl Into<String>) -> TypedParam {
        TypedParam {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Parse the captured value as `T`.
    pub fn parse<T: FromStr>(&self) -> Result<T, HttpError> {
        self.value.parse().map_err(|_| HttpError::BadParam {
            name: self.name.clone(),
            value: self.value.clone(),
        })
    }
}

/// One compiled pattern segment. The enum shape makes the illegal flag
/// combinations of the grammar unrepresentable; the string-level rules
/// are enforced in [`Fragment::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fragment {
    Fixed(String),
    /// `name` keeps the leading ':' so captures line up with what
    /// callers pass to [`Request::param`].
    Parameter { name: String, optional: bool },
    Splat,
}

impl Fragment {
    /// Compile one segment. Violations are programmer errors in route
    /// registration and abort.
    fn parse(value: &str) -> Fragment {
        assert!(!value.is_empty(), "invalid empty fragment");

        if let Some(pos) = value.find('?') {
            assert!(
                value.starts_with(':'),
                "only optional parameters are supported: {value}"
            );
            assert!(
                pos == value.len() - 1,
                "'?' must be the final character: {value}"
            );
            let name = &value[..pos];
            check_ident(&name[1..]);
            return Fragment::Parameter {
                name: name.to_string(),
                optional: true,
            };
        }

        if let Some(name) = value.strip_prefix(':') {
            check_ident(name);
            return Fragment::Parameter {
                name: value.to_string(),
                optional: false,
            };
        }

        if value == "*" {
            return Fragment::Splat;
        }
        assert!(!value.starts_with('*'), "invalid splat fragment: {value}");

        Fragment::Fixed(value.to_string())
    }

    fn matches(&self, raw: &str) -> bool {
        match self {
            Fragment::Fixed(value) => value == raw,
            Fragment::Parameter { .. } | Fragment::Splat => true,
        }
    }

    fn is_optional(&self) -> bool {
        matches!(
            self,
            Fragment::Parameter {
                optional: true,
                ..
            }
        )
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Fixed(value) => f.write_str(value),
            Fragment::Parameter { name, optional } => {
                f.write_str(name)?;
                if *optional {
                    f.write_str("?")?;
                }
                Ok(())
            }
            Fragment::Splat => f.write_str("*"),
        }
    }
}

fn check_ident(name: &str) {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) => {
            (c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    assert!(valid, "invalid parameter name :{name}");
}

fn compile(pattern: &str) -> Vec<Fragment> {
    pattern
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(Fragment::parse)
        .collect()
}

/// Handler invoked for a matched route.
pub type RouteHandler = Box<dyn Fn(&Request, ResponseWriter<'_>) + Send + Sync>;

struct Route {
    fragments: Vec<Fragment>,
    handler: RouteHandler,
}

impl Route {
    /// Match `resource` against this pattern, returning captured
    /// parameters and splats.
    fn matches(&self, resource: &str) -> Option<(Vec<TypedParam>, Vec<TypedParam>)> {
        let request_fragments: Vec<&str> = resource
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        if request_fragments.len() > self.fragments.len() {
            return None;
        }

        let mut params = Vec::new();
        let mut splats = Vec::new();

        for (i, fragment) in self.fragments.iter().enumerate() {
            if i >= request_fragments.len() {
                if fragment.is_optional() {
                    continue;
                }
                return None;
            }

            let raw = request_fragments[i];
            if !fragment.matches(raw) {
                return None;
            }

            match fragment {
                Fragment::Parameter { name, .. } => {
                    params.push(TypedParam::new(name.clone(), raw));
                }
                // A splat is captured under its own value; consumers
                // address splats positionally.
                Fragment::Splat => splats.push(TypedParam::new(raw, raw)),
                Fragment::Fixed(_) => {}
            }
        }

        Some((params, splats))
    }
}

/// An HTTP request augmented with route captures.
pub struct Request {
    inner: crate::request::Request,
    params: Vec<TypedParam>,
    splats: Vec<TypedParam>,
}

impl Request {
    fn new(
        inner: crate::request::Request,
        params: Vec<TypedParam>,
        splats: Vec<TypedParam>,
    ) -> Request {
        Request {
            inner,
            params,
            splats,
        }
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    /// The capture for `:name`. Pass the name with its leading colon.
    pub fn param(&self, name: &str) -> Result<&TypedParam, HttpError> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| HttpError::UnknownParam(name.to_string()))
    }

    pub fn splat_at(&self, index: usize) -> Result<&TypedParam, HttpError> {
        self.splats
            .get(index)
            .ok_or(HttpError::SplatIndex(index))
    }

    pub fn splat(&self) -> &[TypedParam] {
        &self.splats
    }
}

impl Deref for Request {
    type Target = crate::request::Request;

    fn deref(&self) -> &crate::request::Request {
        &self.inner
    }
}

/// Method-keyed route table. Patterns are tried in registration order;
/// the first match dispatches.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, Vec<Route>>,
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    /// Register `pattern` for `method`.
    ///
    /// # Panics
    ///
    /// Panics if the pattern violates the fragment grammar.
    pub fn add(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Fn(&Request, ResponseWriter<'_>) + Send + Sync + 'static,
    ) -> &mut Router {
        self.routes.entry(method).or_default().push(Route {
            fragments: compile(pattern),
            handler: Box::new(handler),
        });
        self
    }

    pub fn get(
        &mut self,
        pattern: &str,
        handler: impl Fn(&Request, ResponseWriter<'_>) + Send + Sync + 'static,
    ) -> &mut Router {
        self.add(Method::Get, pattern, handler)
    }

    pub fn post(
        &mut self,
        pattern: &str,
        handler: impl Fn(&Request, ResponseWriter<'_>) + Send + Sync + 'static,
    ) -> &mut Router {
        self.add(Method::Post, pattern, handler)
    }

    pub fn put(
        &mut self,
        pattern: &str,
        handler: impl Fn(&Request, ResponseWriter<'_>) + Send + Sync + 'static,
    ) -> &mut Router {
        self.add(Method::Put, pattern, handler)
    }

    pub fn delete(
        &mut self,
        pattern: &str,
        handler: impl Fn(&Request, ResponseWriter<'_>) + Send + Sync + 'static,
    ) -> &mut Router {
        self.add(Method::Delete, pattern, handler)
    }

    /// First matching route's captures for `resource`, without invoking
    /// its handler.
    pub fn lookup(
        &self,
        method: Method,
        resource: &str,
    ) -> Option<(Vec<TypedParam>, Vec<TypedParam>)> {
        self.routes
            .get(&method)?
            .iter()
            .find_map(|route| route.matches(resource))
    }

    /// Dispatch `request`: invoke the first matching handler, or answer
    /// 404.
    pub(crate) fn handle(&self, request: crate::request::Request, writer: ResponseWriter<'_>) {
        if let Some(routes) = self.routes.get(&request.method()) {
            for route in routes {
                if let Some((params, splats)) = route.matches(request.resource()) {
                    let routed = Request::new(request, params, splats);
                    (route.handler)(&routed, writer);
                    return;
                }
            }
        }
        let _ = writer.send(Code::NotFound, "Could not find a matching route");
    }
}
