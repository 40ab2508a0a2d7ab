//! Telnet transport adapter (§4.4 AMBIENT: "no crate in the corpus offers a
//! telnet client for this purpose; hand-rolling it does not violate the
//! principle — there is no ecosystem idiom to defer to"). Line-oriented,
//! built directly on `tokio::net::TcpStream` the same way the SSH adapter
//! wraps `ssh2` — open the socket, negotiate nothing (plain network-gear
//! telnet rarely bothers with RFC 854 option negotiation), read until the
//! shell's prompt echoes back.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{DeviceSession, SessionTimeouts};
use crate::entities::{Credential, Device};
use crate::error::{NetRavenError, Result};
use crate::id::DeviceId;

/// Read in small chunks until the stream goes quiet for `quiet_for`, on the
/// assumption the remote shell has printed its prompt and is waiting.
/// Network-device telnet shells have no reliable end-of-output marker, so
/// every adapter in this space (and the SSH adapter's own
/// `strip_trailing_prompt`) leans on trailing-prompt heuristics instead.
async fn read_until_quiet(stream: &mut TcpStream, quiet_for: Duration) -> Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match tokio::time::timeout(quiet_for, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => return Err(NetRavenError::ProtocolError(e.to_string())),
            Err(_) => break,
        }
    }
    Ok(String::from_utf8_lossy(&buf).to_string())
}

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

pub struct TelnetSession {
    stream: Option<TcpStream>,
    device_id: Option<DeviceId>,
}

impl TelnetSession {
    pub fn new() -> Self {
        Self { stream: None, device_id: None }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| NetRavenError::Internal("telnet session not open".to_string()))
    }
}

#[async_trait]
impl DeviceSession for TelnetSession {
    async fn open(&mut self, device: &Device, timeouts: SessionTimeouts) -> Result<()> {
        self.device_id = Some(device.id);
        let addr = format!("{}:{}", device.host, device.port);
        let stream = tokio::time::timeout(timeouts.open, TcpStream::connect(&addr))
            .await
            .map_err(|_| NetRavenError::Timeout(timeouts.open))?
            .map_err(|e| NetRavenError::Unreachable { device_id: device.id, reason: e.to_string() })?;
        self.stream = Some(stream);
        // Drain the banner/login prompt the device prints on connect.
        read_until_quiet(self.stream_mut()?, Duration::from_millis(500)).await?;
        Ok(())
    }

    async fn authenticate(&mut self, credential: &Credential, plaintext_secret: &[u8]) -> Result<()> {
        let device_id = self.device_id;
        let stream = self.stream_mut()?;

        stream
            .write_all(format!("{}\r\n", credential.username).as_bytes())
            .await
            .map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
        read_until_quiet(stream, Duration::from_millis(500)).await?;

        stream
            .write_all(plaintext_secret)
            .await
            .map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
        stream.write_all(b"\r\n").await.map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
        let response = read_until_quiet(stream, Duration::from_millis(500)).await?;

        // Network-device telnet has no structured auth result; a shell
        // rejecting credentials typically re-prints a login prompt rather
        // than closing the socket, so look for that instead of a status code.
        let lowered = response.to_lowercase();
        if lowered.contains("login incorrect") || lowered.contains("authentication failed") || lowered.contains("access denied") {
            return Err(NetRavenError::AuthFailure { device_id: device_id.unwrap_or_default() });
        }
        Ok(())
    }

    async fn run(&mut self, command: &str, timeouts: SessionTimeouts) -> Result<String> {
        let stream = self.stream_mut()?;
        stream
            .write_all(format!("{command}\r\n").as_bytes())
            .await
            .map_err(|e| NetRavenError::ProtocolError(e.to_string()))?;
        let output = tokio::time::timeout(timeouts.command, read_until_quiet(stream, Duration::from_millis(800)))
            .await
            .map_err(|_| NetRavenError::Timeout(timeouts.command))??;
        Ok(strip_trailing_prompt(&output))
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_trailing_prompt_removes_angle_prompt() {
        let output = "uptime is 3 days\nswitch1>";
        assert_eq!(strip_trailing_prompt(output), "uptime is 3 days");
    }
}
