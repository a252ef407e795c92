//! OpenCommand wire types and the transport seam.

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::GatewayError;

/// Actions understood by the game server's command endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "sendCode")]
    SendCode,
    #[serde(rename = "verify")]
    Verify,
    #[serde(rename = "command")]
    Command,
    #[serde(rename = "runmode")]
    RunMode,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Ping => "ping",
            Action::Online => "online",
            Action::SendCode => "sendCode",
            Action::Verify => "verify",
            Action::Command => "command",
            Action::RunMode => "runmode",
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// Credential for the call; empty when the action needs none.
    pub token: String,
    pub action: Action,
    /// Server selector for multi-server deployments.
    pub server: String,
    pub data: Value,
}

impl GatewayRequest {
    pub fn new(action: Action, server: impl Into<String>) -> Self {
        Self {
            token: String::new(),
            action,
            server: server.into(),
            data: Value::Null,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

impl fmt::Debug for GatewayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayRequest")
            .field("token", &if self.token.is_empty() { "" } else { "***" })
            .field("action", &self.action)
            .field("server", &self.server)
            .field("data", &self.data)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(default = "default_retcode")]
    pub retcode: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

fn default_retcode() -> i64 {
    200
}

impl GatewayResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            retcode: 200,
            message: "Success".to_string(),
            data,
        }
    }

    pub fn failed(retcode: i64, message: impl Into<String>) -> Self {
        Self {
            retcode,
            message: message.into(),
            data: Value::Null,
        }
    }

    /// 200 is success; some plugin builds report 0 instead.
    pub fn is_success(&self) -> bool {
        self.retcode == 200 || self.retcode == 0
    }

    /// Payload rendered as text, whatever its JSON shape.
    pub fn data_text(&self) -> String {
        match &self.data {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Sends one request and returns one response. No retries.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a GatewayRequest,
    ) -> BoxFuture<'a, Result<GatewayResponse, GatewayError>>;
}
