//! Adapter that delegates site automation to an external driver process.
//!
//! The driver is started with `sh -c <command>` and speaks JSON lines: one
//! request per line on its stdin, one reply per line on its stdout.
//!
//! ```text
//! -> {"op":"initialize","provider":"QScript","credentials":{...},"input":{...}}
//! <- {"status":"ok"}
//! -> {"op":"authenticate"}
//! <- {"status":"need_code"}
//! -> {"op":"code","code":"123456"}
//! <- {"status":"ok"}
//! -> {"op":"perform_task"}
//! <- {"status":"error","message":"patient not found"}
//! -> {"op":"cleanup"}
//! ```
//!
//! A driver may answer `need_code` to any operation; the adapter then waits
//! for the routed code and forwards it with a `code` request.

use super::{ProviderAdapter, ProviderError};
use crate::credentials::Credentials;
use crate::input::TaskInput;
use crate::session::SessionContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// How long a driver gets to exit after the cleanup request.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Initialize {
        provider: &'a str,
        credentials: &'a Credentials,
        input: &'a TaskInput,
    },
    Authenticate,
    PerformTask,
    Code {
        code: &'a str,
    },
    Cleanup,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Status {
    Ok,
    NeedCode,
    Error,
}

#[derive(Debug, Deserialize)]
struct Reply {
    status: Status,
    #[serde(default)]
    message: Option<String>,
}

struct DriverProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl DriverProcess {
    async fn send(&mut self, request: &Request<'_>) -> Result<(), ProviderError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| ProviderError::Protocol(format!("encode request: {e}")))?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Reply, ProviderError> {
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(ProviderError::Protocol("driver closed its output".into()));
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map_err(|e| ProviderError::Protocol(format!("invalid reply '{line}': {e}")));
        }
    }
}

/// [`ProviderAdapter`] backed by an external driver command.
pub struct DriverAdapter {
    command: String,
    process: Option<DriverProcess>,
}

impl DriverAdapter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            process: None,
        }
    }

    fn spawn(&self, provider: &str) -> Result<DriverProcess, ProviderError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("PORTICO_PROVIDER", provider)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Protocol("driver stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Protocol("driver stdout unavailable".into()))?;

        Ok(DriverProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    /// Send one request and follow any `need_code` detours until the driver
    /// reports a final status.
    async fn call(
        &mut self,
        ctx: &SessionContext,
        request: Request<'_>,
    ) -> Result<(), ProviderError> {
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| ProviderError::Protocol("driver not started".into()))?;

        process.send(&request).await?;
        loop {
            let reply = process.receive().await?;
            match reply.status {
                Status::Ok => return Ok(()),
                Status::Error => {
                    return Err(ProviderError::Failed(
                        reply
                            .message
                            .unwrap_or_else(|| "driver reported an error".into()),
                    ));
                }
                Status::NeedCode => {
                    debug!(provider = %ctx.provider(), "Driver asked for a one-time code");
                    let code = ctx.one_time_code().await?;
                    process.send(&Request::Code { code: &code }).await?;
                }
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for DriverAdapter {
    async fn initialize(&mut self, ctx: &SessionContext) -> Result<(), ProviderError> {
        if self.process.is_none() {
            self.process = Some(self.spawn(ctx.provider())?);
        }
        self.call(
            ctx,
            Request::Initialize {
                provider: ctx.provider(),
                credentials: ctx.credentials(),
                input: ctx.input(),
            },
        )
        .await
    }

    async fn authenticate(&mut self, ctx: &SessionContext) -> Result<(), ProviderError> {
        self.call(ctx, Request::Authenticate).await
    }

    async fn perform_task(&mut self, ctx: &SessionContext) -> Result<(), ProviderError> {
        self.call(ctx, Request::PerformTask).await
    }

    async fn cleanup(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };

        if let Err(e) = process.send(&Request::Cleanup).await {
            debug!(error = %e, "Driver did not accept cleanup request");
        }
        drop(process.stdin);

        match tokio::time::timeout(CLEANUP_TIMEOUT, process.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Driver exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for driver"),
            Err(_) => {
                warn!(command = %self.command, "Driver did not exit in time; killing it");
                if let Err(e) = process.child.kill().await {
                    warn!(error = %e, "Failed to kill driver");
                }
            }
        }
    }
}
