use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use futures::stream::StreamExt;
use tokio::process::Command;
use tokio_util::codec::{BytesCodec, FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;

use super::{CommandOutput, RemoteFollow, RemoteTransport, TransportError};
use crate::config::HtcConfig;
use crate::log::*;
use crate::submit::Endpoint;

/// [`RemoteTransport`] backed by the system's OpenSSH client, so the user's
/// `~/.ssh/config`, agent and known hosts apply as they would in a terminal.
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    copy_tool: Vec<String>,
    shell_tool: Vec<String>,
    ssh_options: Vec<String>,
}

impl OpenSshTransport {
    pub fn new<S: AsRef<str>>(
        copy_tool: S,
        shell_tool: S,
        ssh_options: Vec<String>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            copy_tool: split_tool(copy_tool.as_ref())?,
            shell_tool: split_tool(shell_tool.as_ref())?,
            ssh_options,
        })
    }

    pub fn from_config(config: &HtcConfig) -> Result<Self, TransportError> {
        Self::new(
            config.tools().copy(),
            config.tools().shell(),
            config.ssh_options().clone(),
        )
    }

    /// Build a tokio command for `tool`, resolving its program on PATH.
    fn command(&self, tool: &[String]) -> Result<Command, TransportError> {
        let program = &tool[0];
        let resolved = which::which(program).map_err(|source| TransportError::ToolNotFound {
            tool: program.clone(),
            source,
        })?;
        let mut command = Command::new(resolved);
        command.args(&tool[1..]).args(&self.ssh_options);
        Ok(command)
    }

    fn shell_command(&self, command: &str, endpoint: &Endpoint) -> Result<Command, TransportError> {
        let mut builder = self.command(&self.shell_tool)?;
        builder.arg(endpoint.destination()).arg(command);
        Ok(builder)
    }

    #[tracing::instrument(skip(self, builder, cancel))]
    async fn run_to_completion(
        &self,
        tool: &str,
        mut builder: Command,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, TransportError> {
        let child = builder
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                tool: tool.to_string(),
                source,
            })?;

        // Dropping the child on cancellation kills it.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("cancelled `{}` before it finished", tool);
                return Err(TransportError::Cancelled { tool: tool.to_string() });
            }
            output = child.wait_with_output() => output.map_err(|source| TransportError::Spawn {
                tool: tool.to_string(),
                source,
            })?,
        };

        let output = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("`{}` exited with {:?}", tool, output.code);
        if output.success() {
            Ok(output)
        } else {
            let diagnostic = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            Err(TransportError::Failed {
                tool: tool.to_string(),
                code: output.code,
                diagnostic: diagnostic.to_string(),
            })
        }
    }
}

#[async_trait]
impl RemoteTransport for OpenSshTransport {
    #[tracing::instrument(skip(self, cancel))]
    async fn copy_file(
        &self,
        local: &Path,
        endpoint: &Endpoint,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let mut builder = self.command(&self.copy_tool)?;
        builder
            .arg(local)
            .arg(format!("{}:{}", endpoint.destination(), remote));
        info!("copying {} to {}:{}", local.display(), endpoint, remote);
        self.run_to_completion(&self.copy_tool[0], builder, cancel)
            .await
            .map(|_| ())
    }

    #[tracing::instrument(skip(self, cancel))]
    async fn run_remote_command(
        &self,
        command: &str,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, TransportError> {
        let builder = self.shell_command(command, endpoint)?;
        info!("running `{}` on {}", command, endpoint);
        self.run_to_completion(&self.shell_tool[0], builder, cancel)
            .await
    }

    #[tracing::instrument(skip(self))]
    fn follow_remote_command(
        &self,
        command: &str,
        endpoint: &Endpoint,
    ) -> Result<RemoteFollow, TransportError> {
        let tool = &self.shell_tool[0];
        let mut builder = self.shell_command(command, endpoint)?;
        let mut child = builder
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                tool: tool.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| TransportError::Spawn {
            tool: tool.clone(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout was not piped"),
        })?;
        if let Some(stderr) = child.stderr.take() {
            let tool = tool.clone();
            tokio::task::spawn(async move {
                let mut lines = FramedRead::new(stderr, LinesCodec::new());
                while let Some(Ok(line)) = lines.next().await {
                    warn!("{}: {}", tool, line);
                }
            });
        }

        let output = FramedRead::new(stdout, BytesCodec::new())
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        debug!("following `{}` on {} (pid {:?})", command, endpoint, child.id());
        Ok(RemoteFollow {
            output,
            process: Some(child),
        })
    }

    #[tracing::instrument(skip(self))]
    fn detach_remote_command(
        &self,
        command: &str,
        endpoint: &Endpoint,
    ) -> Result<(), TransportError> {
        let program = &self.shell_tool[0];
        let resolved = which::which(program).map_err(|source| TransportError::ToolNotFound {
            tool: program.clone(),
            source,
        })?;
        // A std process needs no reactor, so this also works while the
        // runtime is shutting down.
        std::process::Command::new(resolved)
            .args(&self.shell_tool[1..])
            .args(&self.ssh_options)
            .arg(endpoint.destination())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                tool: program.clone(),
                source,
            })?;
        info!("issued `{}` on {} without waiting", command, endpoint);
        Ok(())
    }
}

fn split_tool(tool: &str) -> Result<Vec<String>, TransportError> {
    match shell_words::split(tool) {
        Ok(words) if !words.is_empty() => Ok(words),
        _ => Err(TransportError::InvalidTool(tool.to_string())),
    }
}
