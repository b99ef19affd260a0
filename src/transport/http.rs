use std::time::Duration;

use async_trait::async_trait;

use crate::config::HttpConfig;
use crate::error::{ResourceError, Result};
use crate::transport::{Method, Request, Response, Transport};

/// [`Transport`] over HTTPS using reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(ms) = config.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let client = builder
            .build()
            .map_err(|e| ResourceError::Connection(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Put => self.client.put(&request.url).body(request.body),
            Method::Delete => self.client.delete(&request.url),
        };
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            ResourceError::Connection(format!("{} {} failed: {}", request.method, request.url, e))
        })?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            ResourceError::Connection(format!("Reading body of {} failed: {}", request.url, e))
        })?;

        tracing::trace!(method = %request.method, url = %request.url, status, bytes = body.len(), "HTTP exchange");
        Ok(Response { status, body })
    }
}
