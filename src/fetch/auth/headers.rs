use crate::fetch::client::HttpClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;

/// An [`HttpClient`] wrapper that adds a fixed set of headers to every
/// request, e.g. an API key required by a hosted map-matching service.
/// Names and values are validated on construction.
pub struct StaticHeaders<C> {
    pub inner: C,
    headers: HeaderMap,
}

impl<C> StaticHeaders<C> {
    pub fn new(inner: C, headers: &BTreeMap<String, String>) -> Result<Self> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{name}'"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header '{name}'"))?;
            map.insert(name, value);
        }
        Ok(Self {
            inner,
            headers: map,
        })
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for StaticHeaders<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        for (name, value) in &self.headers {
            req.headers_mut().insert(name.clone(), value.clone());
        }
        self.inner.execute(req).await
    }
}
