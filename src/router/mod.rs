//! Ordered method + path routing.
//!
//! Patterns are `/`-separated segments:
//! - literal: `/persons`
//! - capture: `/persons/:id`
//! - trailing rest capture: `/files/*path`
//!
//! Routes are tried in registration order and the first match wins, so
//! specific patterns must be registered before general ones.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::buffer::Buffer;
use crate::http::engine::RequestCb;
use crate::http::reply::Reply;
use crate::http::request::{Method, Request};
use crate::http::status::{HandlerResult, Status};
use crate::ws::{Context, Frame, WsHandler};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("pattern must start with '/': {0}")]
    NotAbsolute(String),

    #[error("empty capture name in pattern: {0}")]
    EmptyCapture(String),

    #[error("rest capture must be the last segment: {0}")]
    RestNotLast(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
    Rest(String),
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pattern {
    segments: Vec<Segment>,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl Pattern {
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        if !pattern.starts_with('/') {
            return Err(RouteError::NotAbsolute(pattern.to_string()));
        }

        let parts: Vec<&str> = segments(pattern).collect();
        let mut compiled = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let segment = if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(RouteError::EmptyCapture(pattern.to_string()));
                }
                Segment::Capture(name.to_string())
            } else if let Some(name) = part.strip_prefix('*') {
                if name.is_empty() {
                    return Err(RouteError::EmptyCapture(pattern.to_string()));
                }
                if i + 1 != parts.len() {
                    return Err(RouteError::RestNotLast(pattern.to_string()));
                }
                Segment::Rest(name.to_string())
            } else {
                Segment::Literal(part.to_string())
            };
            compiled.push(segment);
        }

        Ok(Self { segments: compiled })
    }

    /// Matches `path` (without query) and returns the captures in pattern
    /// order.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = segments(path).collect();
        let mut captures = Vec::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Capture(name) => {
                    captures.push((name.clone(), parts.get(i)?.to_string()));
                }
                Segment::Rest(name) => {
                    captures.push((name.clone(), parts.get(i..).unwrap_or_default().join("/")));
                    return Some(captures);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(captures)
    }
}

#[derive(Clone)]
pub enum Target {
    Http(RequestCb),
    Ws(WsHandler),
}

/// One registered route, filled in through the builder methods.
#[derive(Clone)]
pub struct Route {
    method: Method,
    pattern: Pattern,
    target: Option<Target>,
}

impl Route {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            pattern: Pattern::default(),
            target: None,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&mut self, pattern: &str) -> Result<&mut Self, RouteError> {
        self.pattern = Pattern::parse(pattern)?;
        Ok(self)
    }

    /// Sets the request callback.
    pub fn to<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Request, &mut Buffer, &mut Reply) -> HandlerResult + Send + Sync + 'static,
    {
        self.target = Some(Target::Http(Arc::new(f)));
        self
    }

    /// Upgrades matching requests to WebSocket and feeds frames to `f`.
    pub fn ws<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Frame, &mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.target = Some(Target::Ws(Arc::new(f)));
        self
    }

    fn matches(&self, method: Method, path: &str) -> Option<Vec<(String, String)>> {
        if self.method != method || self.target.is_none() {
            return None;
        }
        self.pattern.matches(path)
    }
}

#[derive(Clone, Default)]
pub struct RoutesMap {
    routes: Vec<Route>,
}

impl RoutesMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, method: Method) -> &mut Route {
        self.routes.push(Route::new(method));
        let last = self.routes.len() - 1;
        &mut self.routes[last]
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route, in registration order, matching `method` and `path`.
    pub fn find(&self, method: Method, path: &str) -> Option<(&Route, Vec<(String, String)>)> {
        self.routes
            .iter()
            .find_map(|route| route.matches(method, path).map(|captures| (route, captures)))
    }

    /// Routes a parsed request: decodes the query, stores captures as
    /// attributes and runs the target.
    pub fn dispatch(&self, req: &mut Request, body: &mut Buffer, rep: &mut Reply) -> HandlerResult {
        req.decode_query();

        let Some((route, captures)) = self.find(req.method(), req.route_path()) else {
            debug!(method = %req.method(), path = %req.path(), "no route");
            return Err(Status::NOT_FOUND.into());
        };

        req.attributes_mut().extend(captures);

        match &route.target {
            Some(Target::Http(cb)) => cb(req, body, rep),
            Some(Target::Ws(handler)) => {
                rep.upgrade(req, handler.clone())?;
                Ok(())
            }
            None => Err(Status::NOT_FOUND.into()),
        }
    }
}

impl From<RoutesMap> for RequestCb {
    fn from(routes: RoutesMap) -> Self {
        Arc::new(move |req: &mut Request, body: &mut Buffer, rep: &mut Reply| {
            routes.dispatch(req, body, rep)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_capture() {
        let p = Pattern::parse("/persons/:id").unwrap();
        assert_eq!(p.matches("/persons/7"), Some(vec![("id".into(), "7".into())]));
        assert_eq!(p.matches("/persons"), None);
        assert_eq!(p.matches("/persons/7/x"), None);
        assert_eq!(p.matches("/people/7"), None);
    }

    #[test]
    fn rest_capture() {
        let p = Pattern::parse("/files/*path").unwrap();
        assert_eq!(p.matches("/files/a/b.txt"), Some(vec![("path".into(), "a/b.txt".into())]));
        assert_eq!(p.matches("/files"), Some(vec![("path".into(), String::new())]));
    }

    #[test]
    fn root() {
        let p = Pattern::parse("/").unwrap();
        assert_eq!(p.matches("/"), Some(vec![]));
        assert_eq!(p.matches("/x"), None);
    }

    #[test]
    fn bad_patterns() {
        assert!(matches!(Pattern::parse("x"), Err(RouteError::NotAbsolute(_))));
        assert!(matches!(Pattern::parse("/a/:"), Err(RouteError::EmptyCapture(_))));
        assert!(matches!(Pattern::parse("/*a/b"), Err(RouteError::RestNotLast(_))));
    }

    #[test]
    fn route_without_target_is_skipped() {
        let mut routes = RoutesMap::new();
        routes.add(Method::GET).path("/a").unwrap();
        assert!(routes.find(Method::GET, "/a").is_none());
    }
}
