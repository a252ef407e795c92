//! HTTP transport for the game server's OpenCommand endpoint.
//!
//! Every action is a JSON POST to a single URL; the response envelope
//! carries its own status code independent of the HTTP status.

use futures::future::BoxFuture;
use reqwest::{header, Client};
use tracing::{debug, warn};

use super::types::{GatewayRequest, GatewayResponse, Transport};
use super::GatewayError;
use crate::config::GatewayConfig;

/// Transport over reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            url: config.full_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::from_status(status, &body))
        }
    }

    fn parse_body(body: &str) -> Result<GatewayResponse, GatewayError> {
        if body.trim().is_empty() {
            return Err(GatewayError::InvalidResponse("empty response body".to_string()));
        }
        serde_json::from_str(body).map_err(|e| {
            GatewayError::InvalidResponse(format!("{}: {}", e, GatewayError::truncate_body(body)))
        })
    }

    async fn post(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        debug!(
            url = %self.url,
            action = request.action.as_str(),
            has_token = !request.token.is_empty(),
            "Sending OpenCommand request"
        );

        let response = self
            .client
            .post(&self.url)
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %self.url, action = request.action.as_str(), error = %e, "OpenCommand request failed");
                GatewayError::NetworkError(e)
            })?;

        let response = Self::check_response(response).await?;
        let body = response.text().await?;
        let parsed = Self::parse_body(&body)?;

        debug!(
            action = request.action.as_str(),
            retcode = parsed.retcode,
            message = %parsed.message,
            "Received OpenCommand response"
        );
        Ok(parsed)
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a GatewayRequest,
    ) -> BoxFuture<'a, Result<GatewayResponse, GatewayError>> {
        Box::pin(self.post(request))
    }
}
