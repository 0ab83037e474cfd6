//! Submitting a job description to an access point: copy it over, run the
//! submit tool on it, and start following its log the first time a
//! submission goes through.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Tools;
use crate::log::*;
use crate::tail::{LogSink, TailError, TailSession};
use crate::transport::{RemoteTransport, TransportError};

pub mod inspector;

pub use inspector::{extract_log_reference, LogReference};

/// A remote access point and the account used on it.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    user: String,
}

impl Endpoint {
    pub fn new<S: Into<String>>(host: S, user: S) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
        }
    }

    /// `user@host`, as understood by ssh and scp.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// Why a submission stopped early. The messages are meant for the user.
#[derive(Error, Debug)]
pub enum SubmitFailure {
    #[error("Failed to read job description {}: {cause}", .path.display())]
    ReadDescriptor { path: PathBuf, cause: std::io::Error },
    #[error("Failed to copy file: {0}")]
    Copy(TransportError),
    #[error("Failed to submit job: {0}")]
    Submit(TransportError),
}

/// The outcome of one call to [`SubmissionWorkflow::submit`].
#[derive(Debug)]
pub struct SubmissionResult {
    pub success: bool,
    /// The submit tool's output on success, the failure otherwise.
    pub message: String,
    pub started_tail: bool,
    pub failure: Option<SubmitFailure>,
    pub log: Option<LogReference>,
    /// Problems that did not stop the submission.
    pub warnings: Vec<String>,
}

impl SubmissionResult {
    fn failed(failure: SubmitFailure, log: Option<LogReference>, warnings: Vec<String>) -> Self {
        error!("{}", failure);
        Self {
            success: false,
            message: failure.to_string(),
            started_tail: false,
            failure: Some(failure),
            log,
            warnings,
        }
    }
}

/// Told when the workflow starts following a job log.
pub trait JobStatusObserver: fmt::Debug + Send + Sync {
    fn tailing_started(&self, log: &LogReference);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl JobStatusObserver for NoopObserver {
    fn tailing_started(&self, _log: &LogReference) {}
}

/// Drives submissions for one host process. Owns the first-submission latch
/// and the one [`TailSession`]; `submit` takes `&mut self`, so submissions
/// through the same workflow never overlap.
#[derive(Debug)]
pub struct SubmissionWorkflow {
    transport: Arc<dyn RemoteTransport>,
    tools: Tools,
    observer: Box<dyn JobStatusObserver>,
    log_sink: Option<Box<dyn LogSink>>,
    submitted: bool,
    tail: Option<TailSession>,
    cancel: CancellationToken,
}

impl SubmissionWorkflow {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        tools: Tools,
        observer: Box<dyn JobStatusObserver>,
    ) -> Self {
        Self {
            transport,
            tools,
            observer,
            log_sink: None,
            submitted: false,
            tail: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Forward the lines of the followed log to `sink` as well.
    pub fn with_log_sink(mut self, sink: Box<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Cancelling this token interrupts an in-flight copy or submit.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn tail(&self) -> Option<&TailSession> {
        self.tail.as_ref()
    }

    /// Copy the job description at `descriptor` into `remote_home` on
    /// `endpoint` and submit it there. Never fails outright: every problem
    /// ends up in the returned [`SubmissionResult`].
    #[tracing::instrument(skip(self))]
    pub async fn submit(
        &mut self,
        descriptor: &Path,
        endpoint: &Endpoint,
        remote_home: &str,
    ) -> SubmissionResult {
        let Some(file_name) = descriptor.file_name() else {
            return SubmissionResult::failed(
                SubmitFailure::ReadDescriptor {
                    path: descriptor.to_path_buf(),
                    cause: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "path does not name a file",
                    ),
                },
                None,
                vec![],
            );
        };
        let remote_path = format!(
            "{}/{}",
            remote_home.trim_end_matches('/'),
            file_name.to_string_lossy()
        );

        let raw_text = match tokio::fs::read_to_string(descriptor).await {
            Ok(raw_text) => raw_text,
            Err(cause) => {
                return SubmissionResult::failed(
                    SubmitFailure::ReadDescriptor {
                        path: descriptor.to_path_buf(),
                        cause,
                    },
                    None,
                    vec![],
                )
            }
        };

        let mut warnings = vec![];
        let log = extract_log_reference(&raw_text, descriptor, remote_home);
        match &log {
            Some(log) => {
                debug!("job log is {}", log.file_name());
                if let Err(err) = tokio::fs::write(log.local_mirror_path(), b"").await {
                    let warning = format!(
                        "Error creating file {}: {}",
                        log.local_mirror_path().display(),
                        err
                    );
                    warn!("{}", warning);
                    warnings.push(warning);
                }
            }
            None => warn!("log filename not found in {}", descriptor.display()),
        }

        if let Err(err) = self
            .transport
            .copy_file(descriptor, endpoint, &remote_path, &self.cancel)
            .await
        {
            return SubmissionResult::failed(SubmitFailure::Copy(err), log, warnings);
        }

        let command = format!(
            "{} {}",
            self.tools.submit(),
            shell_words::quote(&remote_path)
        );
        let output = match self
            .transport
            .run_remote_command(&command, endpoint, &self.cancel)
            .await
        {
            Ok(output) => output,
            Err(err) => return SubmissionResult::failed(SubmitFailure::Submit(err), log, warnings),
        };
        let message = match output.stdout.trim() {
            "" => format!("Submitted {} to {}", remote_path, endpoint),
            stdout => stdout.to_string(),
        };
        info!("{}", message);

        let mut started_tail = false;
        if !self.submitted {
            self.submitted = true;
            match &log {
                Some(log) => match self.start_tail(endpoint, log).await {
                    Ok(()) => {
                        started_tail = true;
                        self.observer.tailing_started(log);
                    }
                    Err(TailError::AlreadyRunning) => {
                        debug!("tail already running, not following {}", log.file_name())
                    }
                    Err(err) => {
                        let warning = format!("Failed to follow {}: {}", log.remote_path(), err);
                        warn!("{}", warning);
                        warnings.push(warning);
                    }
                },
                None => info!("nothing to follow for {}", descriptor.display()),
            }
        } else if let Some(log) = &log {
            let warning = format!(
                "Not following {}: only the log of the first submission is followed",
                log.file_name()
            );
            info!("{}", warning);
            warnings.push(warning);
        }

        SubmissionResult {
            success: true,
            message,
            started_tail,
            failure: None,
            log,
            warnings,
        }
    }

    async fn start_tail(&mut self, endpoint: &Endpoint, log: &LogReference) -> Result<(), TailError> {
        let transport = self.transport.clone();
        let tools = self.tools.clone();
        let log_sink = self.log_sink.take();
        let tail = self.tail.get_or_insert_with(|| {
            let tail = TailSession::new(transport, tools);
            match log_sink {
                Some(sink) => tail.with_log_sink(sink),
                None => tail,
            }
        });
        tail.start(endpoint, log.remote_path(), log.local_mirror_path())
            .await
    }

    /// Stop following the job log, waiting for the remote kill.
    pub async fn stop_tail(&mut self) {
        if let Some(tail) = self.tail.as_mut() {
            tail.stop().await;
        }
    }

    /// Host process teardown: interrupt in-flight transfers and issue the
    /// remote tail teardown without waiting for it.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(tail) = self.tail.as_mut() {
            tail.shutdown();
        }
    }
}
