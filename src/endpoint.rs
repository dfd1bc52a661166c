//! HTTP client for user endpoints.
//!
//! One POST per chunk, with the action named in a request header. Transport
//! failures come back as [`EndpointCallOutcome::NoResponse`] rather than
//! errors so the classification table owns the retry decision; a body read
//! that dies mid-stream is flagged as a timed-out response.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use conveyor_core::model::Endpoint;
use conveyor_core::ports::EndpointClient;
use conveyor_core::wire::{
    EndpointCallOutcome, EndpointHeaders, ExecuteRequest, PreprocessRequest, RawEndpointResponse,
    RUN_METADATA_HEADER, TRIGGER_VERSION_HEADER,
};
use conveyor_core::Result;

const API_KEY_HEADER: &str = "x-trigger-api-key";
const ACTION_HEADER: &str = "x-trigger-action";

pub struct HttpEndpointClient {
    client: reqwest::Client,
}

impl HttpEndpointClient {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(Self { client })
    }

    async fn call<B: serde::Serialize>(
        &self,
        endpoint: &Endpoint,
        action: &str,
        body: &B,
    ) -> EndpointCallOutcome {
        let started = Instant::now();
        let result = self
            .client
            .post(&endpoint.url)
            .header(API_KEY_HEADER, &endpoint.api_key)
            .header(ACTION_HEADER, action)
            .json(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                return EndpointCallOutcome::NoResponse {
                    timed_out: e.is_timeout(),
                    message: e.to_string(),
                }
            }
        };

        let status = response.status().as_u16();
        let headers = parse_headers(response.headers());

        match response.text().await {
            Ok(body) => EndpointCallOutcome::Response(RawEndpointResponse {
                status,
                headers,
                body,
                duration_ms: started.elapsed().as_millis() as i64,
                timed_out: false,
            }),
            // Status arrived but the body stream died: a recognised timeout.
            Err(_) => EndpointCallOutcome::Response(RawEndpointResponse {
                status,
                headers,
                body: String::new(),
                duration_ms: started.elapsed().as_millis() as i64,
                timed_out: true,
            }),
        }
    }
}

fn parse_headers(headers: &reqwest::header::HeaderMap) -> EndpointHeaders {
    let mut raw = HashMap::new();
    for name in [TRIGGER_VERSION_HEADER, RUN_METADATA_HEADER] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            raw.insert(name.to_string(), value.to_string());
        }
    }
    EndpointHeaders::parse(&raw)
}

#[async_trait]
impl EndpointClient for HttpEndpointClient {
    async fn preprocess(
        &self,
        endpoint: &Endpoint,
        body: &PreprocessRequest,
    ) -> Result<EndpointCallOutcome> {
        Ok(self.call(endpoint, "PREPROCESS_RUN", body).await)
    }

    async fn execute(
        &self,
        endpoint: &Endpoint,
        body: &ExecuteRequest,
    ) -> Result<EndpointCallOutcome> {
        Ok(self.call(endpoint, "EXECUTE_JOB", body).await)
    }
}
