//! Default fetcher backed by `reqwest`.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::{
    errors::Error,
    transport::port::{FetchRequest, FetchResponse, Fetcher},
    Result,
};

#[derive(Clone, Debug)]
pub struct ReqwestFetcher {
    http: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!(
                "smc/{} (seat mirai connector)",
                env!("CARGO_PKG_VERSION")
            ))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn request(&self, req: FetchRequest) -> Result<FetchResponse> {
        let mut builder = self.http.request(req.method, req.url);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(map_transport_error)?;

        let status = resp.status();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect::<HashMap<_, _>>();
        let body = resp.text().await.map_err(map_transport_error)?;

        Ok(FetchResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> Error {
    if err.is_connect() || err.is_timeout() {
        return Error::Connection(err.to_string());
    }
    Error::Server {
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}
