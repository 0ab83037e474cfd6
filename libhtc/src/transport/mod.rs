//! Remote copy and remote command execution against an access point.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::submit::Endpoint;

#[cfg(test)]
pub mod fake;
pub mod openssh;

pub use openssh::OpenSshTransport;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("`{tool}` was not found on PATH")]
    ToolNotFound {
        tool: String,
        #[source]
        source: which::Error,
    },
    #[error("invalid tool command `{0}`")]
    InvalidTool(String),
    #[error("spawning `{tool}` failed")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{tool}` exited with {}: {diagnostic}", describe_exit(.code))]
    Failed {
        tool: String,
        code: Option<i32>,
        diagnostic: String,
    },
    #[error("`{tool}` was cancelled")]
    Cancelled { tool: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".into(),
    }
}

/// Captured output of a finished remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A remote command that keeps producing output until it is killed or the
/// connection drops.
pub struct RemoteFollow {
    /// Raw stdout of the remote command, in arrival order.
    pub output: BoxStream<'static, std::io::Result<Vec<u8>>>,
    /// The local process carrying the remote command, if there is one.
    pub process: Option<tokio::process::Child>,
}

impl Debug for RemoteFollow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFollow")
            .field("process", &self.process.as_ref().and_then(|p| p.id()))
            .finish_non_exhaustive()
    }
}

/// Moves files to, and runs commands on, an access point. Every operation is
/// fire-once; retrying is up to the caller.
///
/// Command strings are passed to the remote shell as they are. Callers must
/// not embed untrusted input in them.
#[async_trait]
pub trait RemoteTransport: Debug + Send + Sync {
    /// Copy `local` to `remote` on `endpoint`. The remote directory must
    /// already exist.
    async fn copy_file(
        &self,
        local: &Path,
        endpoint: &Endpoint,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    /// Run `command` in a remote shell and wait for it. A non-zero exit is
    /// reported as [`TransportError::Failed`].
    async fn run_remote_command(
        &self,
        command: &str,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, TransportError>;

    /// Start `command` in a remote shell and hand back its stdout as a stream.
    fn follow_remote_command(
        &self,
        command: &str,
        endpoint: &Endpoint,
    ) -> Result<RemoteFollow, TransportError>;

    /// Start `command` in a remote shell without waiting for it or looking at
    /// its result. Usable outside of an async runtime.
    fn detach_remote_command(&self, command: &str, endpoint: &Endpoint)
        -> Result<(), TransportError>;
}
