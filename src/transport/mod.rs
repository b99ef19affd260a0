//! Request/response primitive the core talks to the grid server through.
//!
//! The core never opens sockets itself. Everything goes through a
//! [`Transport`], which makes one request and hands back the outer HTTP
//! status plus the raw body. Retry policy lives with the callers.
//!
//! cgi endpoints answer with a two-tier status: the HTTP status, and on
//! success a first body line holding the protocol code (`0` ok, `1` error).
//! [`Response::protocol`] splits that line from the payload.

pub mod http;

use std::borrow::Cow;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ResourceError, Result};
use crate::protocol::{HTTP_NOT_FOUND, HTTP_OK, PROTOCOL_OK};

pub use http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url, Bytes::new())
    }

    pub fn put(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Put, url, body.into())
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url, Bytes::new())
    }

    fn new(method: Method, url: impl Into<String>, body: Bytes) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    /// Add a request header (the request property of the wire protocol).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HTTP_OK
    }

    pub fn is_not_found(&self) -> bool {
        self.status == HTTP_NOT_FOUND
    }

    /// Fail with a transport fault unless the outer status is 200.
    pub fn require_ok(self, url: &str) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(ResourceError::Transport {
                url: url.to_string(),
                status: self.status,
            })
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Split the body into the protocol code line and the payload after it.
    pub fn protocol(&self, context: &str) -> Result<(i32, Bytes)> {
        let (line, rest) = match self.body.iter().position(|b| *b == b'\n') {
            Some(nl) => (&self.body[..nl], self.body.slice(nl + 1..)),
            None => (&self.body[..], Bytes::new()),
        };
        let line = String::from_utf8_lossy(line);
        let code = line
            .trim()
            .parse::<i32>()
            .map_err(|_| ResourceError::Malformed {
                context: context.to_string(),
                detail: format!("expected protocol code, got {:?}", line.trim()),
            })?;
        Ok((code, rest))
    }

    /// Like [`Response::protocol`] but fails unless the code is OK.
    pub fn protocol_ok(&self, context: &str) -> Result<Bytes> {
        let (code, payload) = self.protocol(context)?;
        if code != PROTOCOL_OK {
            return Err(ResourceError::Protocol {
                context: context.to_string(),
                code,
            });
        }
        Ok(payload)
    }
}

/// One request in, one response out.
///
/// Implementations report connection-level failures as
/// [`ResourceError::Connection`]; any HTTP status, including errors, is a
/// successful `send`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}
