//! REST transport adapter (§4.4), for devices whose management surface is
//! an HTTP API rather than an interactive shell. Uses `reqwest` — already
//! the workspace's HTTP client, the same crate the teacher reaches for
//! anywhere it talks to an external service (`kernel/tavily_client.rs`,
//! `kernel/firecrawl_client.rs`) — instead of an interactive
//! `open`/`authenticate`/`run` shell, each "command" is a request path the
//! caller supplies, and "authenticate" caches a bearer token for later
//! requests rather than driving a login prompt.

use async_trait::async_trait;
use reqwest::Client;

use super::{DeviceSession, SessionTimeouts};
use crate::entities::{Credential, Device};
use crate::error::{NetRavenError, Result};
use crate::id::DeviceId;

pub struct RestApiSession {
    client: Option<Client>,
    base_url: Option<String>,
    bearer_token: Option<String>,
    device_id: Option<DeviceId>,
}

impl RestApiSession {
    pub fn new() -> Self {
        Self { client: None, base_url: None, bearer_token: None, device_id: None }
    }
}

#[async_trait]
impl DeviceSession for RestApiSession {
    async fn open(&mut self, device: &Device, timeouts: SessionTimeouts) -> Result<()> {
        let client = Client::builder()
            .timeout(timeouts.total)
            .connect_timeout(timeouts.open)
            .build()
            .map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
        self.base_url = Some(format!("https://{}:{}", device.host, device.port));
        self.client = Some(client);
        self.device_id = Some(device.id);
        Ok(())
    }

    /// Exchanges the credential for a bearer token via `POST /auth/login`
    /// with `{username, password}`, the conventional device-REST-API login
    /// shape. A non-2xx response is classified `auth_failure` rather than a
    /// generic protocol error, since §4.4's uniform contract requires
    /// adapters to surface authentication rejection distinctly.
    async fn authenticate(&mut self, credential: &Credential, plaintext_secret: &[u8]) -> Result<()> {
        let client = self.client.as_ref().ok_or_else(|| NetRavenError::Internal("session not open".to_string()))?;
        let base_url = self.base_url.as_ref().ok_or_else(|| NetRavenError::Internal("session not open".to_string()))?;

        let response = client
            .post(format!("{base_url}/auth/login"))
            .json(&serde_json::json!({
                "username": credential.username,
                "password": String::from_utf8_lossy(plaintext_secret),
            }))
            .send()
            .await
            .map_err(|e| self.classify_reqwest_error(e))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED || response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(NetRavenError::AuthFailure { device_id: self.device_id.unwrap_or_default() });
        }
        if !response.status().is_success() {
            return Err(NetRavenError::ProtocolError(format!("login returned {}", response.status())));
        }

        #[derive(serde::Deserialize)]
        struct LoginResponse {
            token: String,
        }
        let body: LoginResponse = response.json().await.map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
        self.bearer_token = Some(body.token);
        Ok(())
    }

    /// `command` is interpreted as a request path (e.g. `GET
    /// /api/v1/running-config`); the leading verb is optional and defaults
    /// to `GET`.
    async fn run(&mut self, command: &str, _timeouts: SessionTimeouts) -> Result<String> {
        let client = self.client.as_ref().ok_or_else(|| NetRavenError::Internal("session not open".to_string()))?;
        let base_url = self.base_url.as_ref().ok_or_else(|| NetRavenError::Internal("session not open".to_string()))?;

        let (method, path) = match command.split_once(' ') {
            Some((verb, rest)) if matches!(verb, "GET" | "POST" | "PUT" | "DELETE") => (verb, rest),
            _ => ("GET", command),
        };

        let mut request = match method {
            "POST" => client.post(format!("{base_url}{path}")),
            "PUT" => client.put(format!("{base_url}{path}")),
            "DELETE" => client.delete(format!("{base_url}{path}")),
            _ => client.get(format!("{base_url}{path}")),
        };
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.classify_reqwest_error(e))?;
        if !response.status().is_success() {
            return Err(NetRavenError::ProtocolError(format!("{path} returned {}", response.status())));
        }
        response.text().await.map_err(|e| NetRavenError::ProtocolError(e.to_string()))
    }

    async fn close(&mut self) {
        self.client = None;
        self.bearer_token = None;
    }
}

impl RestApiSession {
    fn classify_reqwest_error(&self, e: reqwest::Error) -> NetRavenError {
        if e.is_timeout() {
            NetRavenError::Timeout(std::time::Duration::from_secs(0))
        } else if e.is_connect() {
            NetRavenError::Unreachable { device_id: self.device_id.unwrap_or_default(), reason: e.to_string() }
        } else {
            NetRavenError::ProtocolError(e.to_string())
        }
    }
}
