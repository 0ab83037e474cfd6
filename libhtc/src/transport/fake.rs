//! A scripted [`RemoteTransport`] that records what it was asked to do.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::{CommandOutput, RemoteFollow, RemoteTransport, TransportError};
use crate::submit::Endpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Copy {
        local: PathBuf,
        destination: String,
        remote: String,
    },
    Run {
        destination: String,
        command: String,
    },
    Follow {
        destination: String,
        command: String,
    },
    Detach {
        destination: String,
        command: String,
    },
}

pub type FollowTx = mpsc::Sender<std::io::Result<Vec<u8>>>;

#[derive(Debug, Default)]
struct Script {
    calls: Vec<Call>,
    fail_copy: Option<String>,
    fail_commands: Vec<(String, String)>,
    command_output: Option<String>,
    follows: VecDeque<ReceiverStream<std::io::Result<Vec<u8>>>>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    script: Arc<Mutex<Script>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_copy<S: Into<String>>(&self, diagnostic: S) {
        self.script.lock().unwrap().fail_copy = Some(diagnostic.into());
    }

    pub fn clear_copy_failure(&self) {
        self.script.lock().unwrap().fail_copy = None;
    }

    /// Fail every remote command starting with `prefix`.
    pub fn fail_command<S: Into<String>>(&self, prefix: S, diagnostic: S) {
        self.script
            .lock()
            .unwrap()
            .fail_commands
            .push((prefix.into(), diagnostic.into()));
    }

    pub fn set_command_output<S: Into<String>>(&self, stdout: S) {
        self.script.lock().unwrap().command_output = Some(stdout.into());
    }

    /// Queue the output of the next followed command. Whatever is sent on
    /// the returned sender shows up as remote output; dropping it ends the
    /// stream.
    pub fn push_follow(&self) -> FollowTx {
        let (tx, rx) = mpsc::channel(64);
        self.script
            .lock()
            .unwrap()
            .follows
            .push_back(ReceiverStream::new(rx));
        tx
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn runs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Run { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn detached(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Detach { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RemoteTransport for FakeTransport {
    async fn copy_file(
        &self,
        local: &Path,
        endpoint: &Endpoint,
        remote: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Copy {
            local: local.to_path_buf(),
            destination: endpoint.destination(),
            remote: remote.to_string(),
        });
        match &script.fail_copy {
            Some(diagnostic) => Err(TransportError::Failed {
                tool: "scp".into(),
                code: Some(1),
                diagnostic: diagnostic.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn run_remote_command(
        &self,
        command: &str,
        endpoint: &Endpoint,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, TransportError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Run {
            destination: endpoint.destination(),
            command: command.to_string(),
        });
        if let Some((_, diagnostic)) = script
            .fail_commands
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return Err(TransportError::Failed {
                tool: "ssh".into(),
                code: Some(1),
                diagnostic: diagnostic.clone(),
            });
        }
        Ok(CommandOutput {
            code: Some(0),
            stdout: script.command_output.clone().unwrap_or_default(),
            stderr: String::new(),
        })
    }

    fn follow_remote_command(
        &self,
        command: &str,
        endpoint: &Endpoint,
    ) -> Result<RemoteFollow, TransportError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Follow {
            destination: endpoint.destination(),
            command: command.to_string(),
        });
        let output = match script.follows.pop_front() {
            Some(stream) => stream.boxed(),
            None => futures::stream::empty().boxed(),
        };
        Ok(RemoteFollow {
            output,
            process: None,
        })
    }

    fn detach_remote_command(
        &self,
        command: &str,
        endpoint: &Endpoint,
    ) -> Result<(), TransportError> {
        self.script.lock().unwrap().calls.push(Call::Detach {
            destination: endpoint.destination(),
            command: command.to_string(),
        });
        Ok(())
    }
}
