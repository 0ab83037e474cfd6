//! The single long-lived remote `tail -f` that mirrors a job log into a local
//! file.
//!
//! The remote side is started as `echo $$; exec tail -f <log>`, so the first
//! line of output is the pid of the remote tail. Teardown targets that pid,
//! and only falls back to killing by process name when no pid came back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use derive_getters::Getters;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::Tools;
use crate::log::*;
use crate::submit::Endpoint;
use crate::transport::{RemoteFollow, RemoteTransport, TransportError};

pub mod sink;

pub use sink::{LogSink, LogSource, PartialLogStream};

use self::sink::LineSplitter;

const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum TailError {
    #[error("a tail is already running")]
    AlreadyRunning,
    #[error("this tail session has already finished")]
    Finished,
    #[error("failed to start the remote tail")]
    Transport(
        #[from]
        #[source]
        TransportError,
    ),
    #[error("failed to prepare local mirror {}", .path.display())]
    Mirror {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("log sink closed")]
    SinkClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Idle,
    Running,
    Terminated,
}

/// Where a tail reads from and writes to.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
pub struct TailTarget {
    endpoint: Endpoint,
    remote_log_path: String,
    local_mirror_path: PathBuf,
}

#[derive(Debug)]
pub struct TailSession {
    transport: Arc<dyn RemoteTransport>,
    tools: Tools,
    state: TailState,
    target: Option<TailTarget>,
    remote_pid: Option<u32>,
    process: Option<Child>,
    pump: Option<JoinHandle<()>>,
    log_sink: Option<Box<dyn LogSink>>,
    torn_down: bool,
}

impl TailSession {
    pub fn new(transport: Arc<dyn RemoteTransport>, tools: Tools) -> Self {
        Self {
            transport,
            tools,
            state: TailState::Idle,
            target: None,
            remote_pid: None,
            process: None,
            pump: None,
            log_sink: None,
            torn_down: false,
        }
    }

    /// Also hand every mirrored line to `sink`. Must be set before `start`.
    pub fn with_log_sink(mut self, sink: Box<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Current state. A running tail whose remote side has gone away on its
    /// own reports `Terminated`.
    pub fn state(&self) -> TailState {
        match (&self.state, &self.pump) {
            (TailState::Running, Some(pump)) if pump.is_finished() => TailState::Terminated,
            (state, _) => *state,
        }
    }

    pub fn target(&self) -> Option<&TailTarget> {
        self.target.as_ref()
    }

    /// Pid of the tail on the access point, if it reported one.
    pub fn remote_pid(&self) -> Option<u32> {
        self.remote_pid
    }

    /// Start following `remote_log_path` on `endpoint` into
    /// `local_mirror_path`. The mirror is truncated first so that content
    /// from an earlier run never looks new.
    #[tracing::instrument(skip(self))]
    pub async fn start(
        &mut self,
        endpoint: &Endpoint,
        remote_log_path: &str,
        local_mirror_path: &Path,
    ) -> Result<(), TailError> {
        match self.state() {
            TailState::Running => {
                warn!("not starting a tail of {}: one is already running", remote_log_path);
                return Err(TailError::AlreadyRunning);
            }
            TailState::Terminated => return Err(TailError::Finished),
            TailState::Idle => {}
        }

        let mirror_error = |source| TailError::Mirror {
            path: local_mirror_path.to_path_buf(),
            source,
        };
        tokio::fs::write(local_mirror_path, b"")
            .await
            .map_err(mirror_error)?;
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(local_mirror_path)
            .await
            .map_err(mirror_error)?;

        let command = format!(
            "echo $$; exec {} -f {}",
            self.tools.tail(),
            shell_words::quote(remote_log_path)
        );
        let RemoteFollow {
            mut output,
            process,
        } = self.transport.follow_remote_command(&command, endpoint)?;

        let pid_timeout = Duration::from_secs(*self.tools.pid_timeout_secs());
        let (remote_pid, leftover) = read_remote_pid(&mut output, pid_timeout).await;
        match remote_pid {
            Some(pid) => debug!("remote tail of {} has pid {}", remote_log_path, pid),
            None => warn!(
                "remote tail of {} did not report a pid; teardown will match by name",
                remote_log_path
            ),
        }

        let handle = tokio::task::spawn(pump(
            output,
            file,
            self.log_sink.take(),
            leftover,
            local_mirror_path.to_path_buf(),
        ));

        self.remote_pid = remote_pid;
        self.process = process;
        self.pump = Some(handle);
        self.target = Some(TailTarget {
            endpoint: endpoint.clone(),
            remote_log_path: remote_log_path.to_string(),
            local_mirror_path: local_mirror_path.to_path_buf(),
        });
        self.state = TailState::Running;
        info!(
            "tailing {}:{} into {}",
            endpoint,
            remote_log_path,
            local_mirror_path.display()
        );
        Ok(())
    }

    fn teardown_command(&self) -> String {
        match self.remote_pid {
            Some(pid) => format!("kill {pid}"),
            None => format!("{} {}", self.tools.kill_by_name(), self.tools.tail()),
        }
    }

    /// Kill the remote tail and stop mirroring. Best-effort: the session is
    /// `Terminated` afterwards whether or not the remote kill worked. Calling
    /// it again does nothing.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&mut self) {
        if self.state == TailState::Running && !self.torn_down {
            self.torn_down = true;
            if let Some(target) = &self.target {
                let command = self.teardown_command();
                match self
                    .transport
                    .run_remote_command(&command, &target.endpoint, &CancellationToken::new())
                    .await
                {
                    Ok(_) => info!("stopped remote tail of {}", target.remote_log_path),
                    Err(err) => warn!("`{}` on {} failed: {}", command, target.endpoint, err),
                }
            }
            if let Some(process) = self.process.as_mut() {
                if let Err(err) = process.start_kill() {
                    debug!("local tail process already gone: {}", err);
                }
            }
            if let Some(pump) = self.pump.as_mut() {
                if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, &mut *pump).await.is_err() {
                    debug!("mirror did not drain in time, aborting it");
                    pump.abort();
                }
            }
        }
        self.state = TailState::Terminated;
    }

    /// Issue the remote teardown without waiting for it. Used when the host
    /// process is going away; safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.state == TailState::Running && !self.torn_down {
            self.torn_down = true;
            if let Some(target) = &self.target {
                let command = self.teardown_command();
                if let Err(err) = self
                    .transport
                    .detach_remote_command(&command, &target.endpoint)
                {
                    warn!("could not issue `{}` on {}: {}", command, target.endpoint, err);
                }
            }
            if let Some(process) = self.process.as_mut() {
                let _ = process.start_kill();
            }
            if let Some(pump) = &self.pump {
                pump.abort();
            }
        }
        self.state = TailState::Terminated;
    }
}

impl Drop for TailSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wait for the first line of output and parse it as a pid. Anything that
/// is not a pid, including whatever followed the pid line, is returned
/// for mirroring.
async fn read_remote_pid(
    output: &mut BoxStream<'static, std::io::Result<Vec<u8>>>,
    timeout: Duration,
) -> (Option<u32>, Vec<u8>) {
    let mut first = Vec::new();
    let handshake = async {
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(bytes) => {
                    first.extend_from_slice(&bytes);
                    if first.contains(&b'\n') {
                        break;
                    }
                }
                Err(err) => {
                    warn!("reading remote tail output failed: {}", err);
                    break;
                }
            }
        }
    };
    if tokio::time::timeout(timeout, handshake).await.is_err() {
        debug!("no pid line within {:?}", timeout);
    }

    let Some(newline) = first.iter().position(|b| *b == b'\n') else {
        return (None, first);
    };
    let pid = std::str::from_utf8(&first[..newline])
        .ok()
        .and_then(|line| line.trim().parse::<u32>().ok());
    match pid {
        Some(pid) => (Some(pid), first.split_off(newline + 1)),
        None => (None, first),
    }
}

#[tracing::instrument(skip(output, file, log_sink, leftover))]
async fn pump(
    mut output: BoxStream<'static, std::io::Result<Vec<u8>>>,
    mut file: File,
    mut log_sink: Option<Box<dyn LogSink>>,
    leftover: Vec<u8>,
    mirror_path: PathBuf,
) {
    let mut splitter = LineSplitter::default();
    if !leftover.is_empty() {
        mirror(&mut file, &mut log_sink, &mut splitter, &leftover).await;
    }
    while let Some(chunk) = output.next().await {
        match chunk {
            Ok(bytes) => mirror(&mut file, &mut log_sink, &mut splitter, &bytes).await,
            Err(err) => {
                error!("remote tail output failed: {}", err);
                break;
            }
        }
    }

    if let Some(sink) = log_sink.as_mut() {
        if let Some(rest) = splitter.finish() {
            let _ = sink.sink(PartialLogStream::Next(vec![rest])).await;
        }
        let _ = sink.sink(PartialLogStream::End).await;
    }
    info!("tail into {} ended", mirror_path.display());
}

async fn mirror(
    file: &mut File,
    log_sink: &mut Option<Box<dyn LogSink>>,
    splitter: &mut LineSplitter,
    bytes: &[u8],
) {
    if let Err(err) = file.write_all(bytes).await {
        error!("writing to local mirror failed: {}", err);
    } else if let Err(err) = file.flush().await {
        error!("flushing local mirror failed: {}", err);
    }

    if let Some(sink) = log_sink.as_mut() {
        let lines = splitter.push(bytes);
        if !lines.is_empty() && sink.sink(PartialLogStream::Next(lines)).await.is_err() {
            debug!("log sink went away, mirroring to file only");
            *log_sink = None;
        }
    }
}
