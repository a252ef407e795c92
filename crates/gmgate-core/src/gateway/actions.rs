use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::client::HttpTransport;
use super::types::{Action, GatewayRequest, GatewayResponse, Transport};
use super::GatewayError;
use crate::command::{NormalizedCommand, TargetId};
use crate::config::GatewayConfig;

/// Typed access to the game server's command actions.
///
/// Any non-success status code is turned into [`GatewayError::Rejected`];
/// nothing is retried.
#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn Transport>,
    server: String,
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>, server: impl Into<String>) -> Self {
        Self {
            transport,
            server: server.into(),
        }
    }

    /// Gateway over HTTP, configured from `config`.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), config.server.clone()))
    }

    async fn call(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let action = request.action;
        let response = self.transport.send(&request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            warn!(
                action = action.as_str(),
                retcode = response.retcode,
                message = %response.message,
                "Game server rejected request"
            );
            Err(GatewayError::Rejected {
                code: response.retcode,
                message: response.message,
            })
        }
    }

    fn request(&self, action: Action) -> GatewayRequest {
        GatewayRequest::new(action, self.server.clone())
    }

    pub async fn ping(&self) -> Result<GatewayResponse, GatewayError> {
        self.call(self.request(Action::Ping)).await
    }

    pub async fn online_players(&self) -> Result<GatewayResponse, GatewayError> {
        self.call(self.request(Action::Online)).await
    }

    pub async fn run_mode(&self, token: &str) -> Result<GatewayResponse, GatewayError> {
        self.call(self.request(Action::RunMode).with_token(token)).await
    }

    /// Ask the server to deliver a code to `target` in game.
    /// Returns the opaque token identifying this verification attempt.
    pub async fn deliver_code(&self, target: &TargetId) -> Result<String, GatewayError> {
        let data = match target.as_number() {
            Some(n) => Value::from(n),
            None => Value::from(target.as_str()),
        };
        let response = self.call(self.request(Action::SendCode).with_data(data)).await?;

        match response.data {
            Value::String(token) if !token.is_empty() => {
                info!(target_id = %target, "Verification code delivered");
                Ok(token)
            }
            other => Err(GatewayError::InvalidResponse(format!(
                "expected a verification token, got {}",
                other
            ))),
        }
    }

    /// Submit a caller-supplied code for the attempt identified by `token`.
    pub async fn redeem_code(&self, token: &str, code: &str) -> Result<GatewayResponse, GatewayError> {
        let code = code.trim();
        let data = match code.parse::<u64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::from(code),
        };
        self.call(self.request(Action::Verify).with_token(token).with_data(data))
            .await
    }

    /// Run a normalized command with `credential`.
    pub async fn run_command(
        &self,
        credential: &str,
        command: &NormalizedCommand,
    ) -> Result<GatewayResponse, GatewayError> {
        debug!(command = %command, "Running command");
        self.call(
            self.request(Action::Command)
                .with_token(credential)
                .with_data(Value::from(command.as_str())),
        )
        .await
    }
}
