use std::collections::HashMap;

use async_trait::async_trait;

use crate::Result;

pub use reqwest::{Method, Url};

/// A fully resolved outbound request.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            body: None,
        }
    }
}

/// Raw response as seen on the wire. Header names are lowercase.
#[derive(Clone, Debug, Default)]
pub struct FetchResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Pluggable HTTP engine.
///
/// Implementations return `Ok` for every response that arrived, whatever its
/// status; HTTP-level classification is the dispatcher's job. Failing to reach
/// the host is [`crate::Error::Connection`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn request(&self, req: FetchRequest) -> Result<FetchResponse>;
}
