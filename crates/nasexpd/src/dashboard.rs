//! HTTP transport for dashboard annotations.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use nasexp_core::annotations::{
    AnnotateError, DashboardClient, DashboardMethod, DashboardRequest, DashboardResponse,
};

/// Sends annotation requests with a blocking reqwest client.
///
/// Must be called from a blocking context (`spawn_blocking`), and the last
/// handle must be dropped outside the async runtime.
pub(crate) struct HttpDashboardClient {
    client: Client,
}

impl HttpDashboardClient {
    pub(crate) fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl DashboardClient for HttpDashboardClient {
    fn send(&self, request: &DashboardRequest) -> Result<DashboardResponse, AnnotateError> {
        let method = match request.method {
            DashboardMethod::Post => reqwest::Method::POST,
            DashboardMethod::Patch => reqwest::Method::PATCH,
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .header(CONTENT_TYPE, "application/json")
            .body(request.body.clone());
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .map_err(|e| AnnotateError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| AnnotateError::Transport(e.to_string()))?;
        Ok(DashboardResponse {
            status,
            body: body.to_vec(),
        })
    }
}
