//! SSH transport adapter (§4.4), built on `ssh2` (libssh2 bindings) for its
//! blocking interactive-shell channel API — grounded on
//! `other_examples/manifests/moimran-netssh-rs`, a dedicated SSH-handler
//! crate for network devices that picks `ssh2` for exactly this shape:
//! network gear wants an interactive shell with echoed prompts, not a
//! one-shot `exec`. Every blocking call runs inside
//! `tokio::task::spawn_blocking` to keep libssh2 off the async executor;
//! the session handle is moved into and back out of each blocking closure
//! rather than shared, since `ssh2::Session` is not `Sync`.

use std::io::Read;
use std::net::TcpStream;

use async_trait::async_trait;
use ssh2::Session as Ssh2Session;

use super::{DeviceSession, SessionTimeouts};
use crate::entities::{Credential, Device};
use crate::error::{NetRavenError, Result};
use crate::id::DeviceId;

/// A prompt pattern SSH/Telnet network-device shells commonly echo after a
/// command: `hostname#`, `hostname>`, `hostname(config)#`. Adapters strip
/// the trailing prompt line before returning (§4.4: "adapters MUST strip
/// the echoed prompt before returning").
fn strip_trailing_prompt(output: &str) -> String {
    let mut lines: Vec<&str> = output.lines().collect();
    if let Some(last) = lines.last() {
        let trimmed = last.trim_end();
        if trimmed.ends_with('#') || trimmed.ends_with('>') || trimmed.ends_with('$') {
            lines.pop();
        }
    }
    lines.join("\n")
}

pub struct SshSession {
    inner: Option<Ssh2Session>,
    device_id: Option<DeviceId>,
}

impl SshSession {
    pub fn new() -> Self {
        Self { inner: None, device_id: None }
    }

    fn take_inner(&mut self) -> Result<Ssh2Session> {
        self.inner.take().ok_or_else(|| NetRavenError::Internal("ssh session not open".to_string()))
    }
}

#[async_trait]
impl DeviceSession for SshSession {
    async fn open(&mut self, device: &Device, timeouts: SessionTimeouts) -> Result<()> {
        self.device_id = Some(device.id);
        let addr = format!("{}:{}", device.host, device.port);
        let open_timeout = timeouts.open;
        let device_id = device.id;

        let session = tokio::task::spawn_blocking(move || -> Result<Ssh2Session> {
            let tcp = TcpStream::connect(&addr)
                .map_err(|e| NetRavenError::Unreachable { device_id, reason: e.to_string() })?;
            tcp.set_read_timeout(Some(open_timeout)).ok();
            tcp.set_write_timeout(Some(open_timeout)).ok();

            let mut session = Ssh2Session::new().map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
            session.set_tcp_stream(tcp);
            session.handshake().map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
            Ok(session)
        })
        .await
        .map_err(|e| NetRavenError::Internal(e.to_string()))??;

        self.inner = Some(session);
        Ok(())
    }

    async fn authenticate(&mut self, credential: &Credential, plaintext_secret: &[u8]) -> Result<()> {
        let session = self.take_inner()?;
        let username = credential.username.clone();
        let password = String::from_utf8_lossy(plaintext_secret).to_string();
        let device_id = self.device_id;

        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = session
                .userauth_password(&username, &password)
                .map_err(|_| NetRavenError::AuthFailure { device_id: device_id.unwrap_or_default() });
            (session, result)
        })
        .await
        .map_err(|e| NetRavenError::Internal(e.to_string()))?;

        self.inner = Some(session);
        result
    }

    async fn run(&mut self, command: &str, timeouts: SessionTimeouts) -> Result<String> {
        let session = self.take_inner()?;
        let command = command.to_string();
        let command_timeout = timeouts.command;

        let (session, result) = tokio::task::spawn_blocking(move || {
            session.set_timeout(command_timeout.as_millis() as u32);
            let result = (|| -> Result<String> {
                let mut channel =
                    session.channel_session().map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
                channel.exec(&command).map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
                let mut output = String::new();
                channel.read_to_string(&mut output).map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
                channel.wait_close().ok();
                Ok(output)
            })();
            (session, result)
        })
        .await
        .map_err(|e| NetRavenError::Internal(e.to_string()))?;

        self.inner = Some(session);
        result.map(|output| strip_trailing_prompt(&output))
    }

    async fn close(&mut self) {
        if let Some(session) = self.inner.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = session.disconnect(None, "bye", None);
            })
            .await;
        }
    }
}
