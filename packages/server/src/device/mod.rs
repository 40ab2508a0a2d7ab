//! C5 Device Communication (§4.4): the uniform session contract and its
//! transport adapters. Grounded on §9's redesign flag — "variant over
//! transport kinds behind the uniform adapter contract; no base-class
//! state" — so `TransportKind` selects a `Box<dyn DeviceSession>` at
//! session-open time rather than an inheritance hierarchy.

mod rest_api;
mod retry;
mod ssh;
mod telnet;

pub use retry::{backoff_delay, RetryPolicy};

use std::time::Duration;

use async_trait::async_trait;

use crate::entities::{Credential, Device, TransportKind};
use crate::error::{DeviceErrorKind, NetRavenError, Result};

/// Per-attempt timeouts (§4.4: "open timeout T_o", "command timeout T_c per
/// command", "total per-attempt timeout T_a").
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    pub reachability: Duration,
    pub open: Duration,
    pub command: Duration,
    pub total: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            reachability: Duration::from_secs(3),
            open: Duration::from_secs(10),
            command: Duration::from_secs(30),
            total: Duration::from_secs(120),
        }
    }
}

/// Max bytes buffered from a single command's output before it is
/// classified `command_error` (§4.4: "on overrun classify `command_error`
/// with 'output exceeded limit'").
pub const MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// The uniform per-attempt contract every transport adapter implements
/// (§4.4: "adapters expose a uniform interface `{ open, authenticate,
/// run(cmd), close }`").
#[async_trait]
pub trait DeviceSession: Send {
    async fn open(&mut self, device: &Device, timeouts: SessionTimeouts) -> Result<()>;
    async fn authenticate(&mut self, credential: &Credential, plaintext_secret: &[u8]) -> Result<()>;
    async fn run(&mut self, command: &str, timeouts: SessionTimeouts) -> Result<String>;
    /// Best-effort disconnect; adapters MUST NOT leak sockets even if this
    /// errors (§4.4: "adapters guarantee best-effort disconnect").
    async fn close(&mut self);
}

/// Builds the adapter for `device`'s transport kind.
pub fn adapter_for(kind: TransportKind) -> Box<dyn DeviceSession> {
    match kind {
        TransportKind::Ssh => Box::new(ssh::SshSession::new()),
        TransportKind::Telnet => Box::new(telnet::TelnetSession::new()),
        TransportKind::RestApi => Box::new(rest_api::RestApiSession::new()),
    }
}

/// Outcome of one full (device, credential) attempt, mapping directly onto
/// `DeviceErrorKind` (§4.4 error taxonomy) plus whatever output the command
/// sequence produced.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub status: DeviceErrorKind,
    pub output: Option<String>,
    pub error_message: Option<String>,
}

impl AttemptOutcome {
    pub fn success(output: String) -> Self {
        Self { status: DeviceErrorKind::Success, output: Some(output), error_message: None }
    }

    pub fn failure(status: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self { status, output: None, error_message: Some(message.into()) }
    }
}

/// Runs the reachability pre-check, then opens, authenticates, and runs
/// `commands` in sequence, closing on every exit path (§4.4 steps 1-6).
/// Retries per `policy` on `timeout`/`protocol_error` (§4.4: "orthogonal to
/// credential retry").
pub async fn run_attempt(
    device: &Device,
    credential: &Credential,
    plaintext_secret: &[u8],
    commands: &[String],
    timeouts: SessionTimeouts,
    policy: &RetryPolicy,
) -> AttemptOutcome {
    if let Err(e) = reachability::check(device, timeouts.reachability).await {
        return AttemptOutcome::failure(DeviceErrorKind::Unreachable, e.to_string());
    }

    let mut attempt = 0u32;
    loop {
        let outcome = run_attempt_once(device, credential, plaintext_secret, commands, timeouts).await;
        let should_retry = matches!(outcome.status, DeviceErrorKind::Timeout | DeviceErrorKind::ProtocolError)
            && attempt < policy.max_retries;

        if !should_retry {
            return outcome;
        }
        tokio::time::sleep(backoff_delay(policy, attempt)).await;
        attempt += 1;
    }
}

async fn run_attempt_once(
    device: &Device,
    credential: &Credential,
    plaintext_secret: &[u8],
    commands: &[String],
    timeouts: SessionTimeouts,
) -> AttemptOutcome {
    let mut session = adapter_for(device.transport_kind);

    let result: Result<String> = async {
        session.open(device, timeouts).await?;
        session.authenticate(credential, plaintext_secret).await.map_err(|e| match e {
            NetRavenError::AuthFailure { .. } => e,
            other => other,
        })?;

        let mut combined_output = String::new();
        for command in commands {
            let output = session.run(command, timeouts).await?;
            if combined_output.len() + output.len() > MAX_OUTPUT_BYTES {
                return Err(NetRavenError::ProtocolError("output exceeded limit".to_string()));
            }
            combined_output.push_str(&output);
        }
        Ok(combined_output)
    }
    .await;

    session.close().await;

    match result {
        Ok(output) => AttemptOutcome::success(output),
        Err(NetRavenError::AuthFailure { .. }) => {
            AttemptOutcome::failure(DeviceErrorKind::AuthFailure, "authentication failed")
        }
        Err(NetRavenError::Timeout(_)) => AttemptOutcome::failure(DeviceErrorKind::Timeout, "attempt timed out"),
        Err(NetRavenError::ProtocolError(msg)) if msg == "output exceeded limit" => {
            AttemptOutcome::failure(DeviceErrorKind::CommandError, msg)
        }
        Err(NetRavenError::ProtocolError(msg)) => AttemptOutcome::failure(DeviceErrorKind::ProtocolError, msg),
        Err(e) => AttemptOutcome::failure(DeviceErrorKind::CommandError, e.to_string()),
    }
}

pub mod reachability {
    //! Cheap TCP pre-check (§4.4 step 1). A bare `TcpStream::connect` with a
    //! deadline stands in for "TCP/ICMP to port" — ICMP requires raw
    //! sockets and elevated privileges the worker process should not need
    //! just to answer "is anything listening."

    use std::time::Duration;

    use tokio::net::TcpStream;

    use crate::entities::Device;
    use crate::error::{NetRavenError, Result};

    pub async fn check(device: &Device, timeout: Duration) -> Result<()> {
        let addr = format!("{}:{}", device.host, device.port);
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(NetRavenError::Unreachable { device_id: device.id, reason: e.to_string() }),
            Err(_) => Err(NetRavenError::Unreachable {
                device_id: device.id,
                reason: format!("no response within {timeout:?}"),
            }),
        }
    }
}
