use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use color_eyre::eyre::{Result, WrapErr};
use libhtc::config::HtcConfig;
use libhtc::log::*;
use libhtc::submit::{Endpoint, JobStatusObserver, LogReference, SubmissionResult, SubmissionWorkflow};
use libhtc::tail::sink::{self, LogSource};
use libhtc::tail::{PartialLogStream, TailState};
use libhtc::transport::OpenSshTransport;
use regex::Regex;

use super::{CliContext, CommandErrors, Interactive};
use crate::config;

static USER_NAME: OnceLock<Regex> = OnceLock::new();
static HOST_NAME: OnceLock<Regex> = OnceLock::new();

fn user_name_regex() -> &'static Regex {
    USER_NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("valid regex"))
}

fn host_name_regex() -> &'static Regex {
    HOST_NAME.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.-]*$").expect("valid regex"))
}

/// Prints a notice when the log of a submitted job starts being followed.
#[derive(Debug)]
struct ConsoleObserver;

impl JobStatusObserver for ConsoleObserver {
    fn tailing_started(&self, log: &LogReference) {
        println!(
            "* watching job log {} -> {}",
            log.remote_path(),
            log.local_mirror_path().display()
        );
    }
}

pub struct SubmitCommand;

impl SubmitCommand {
    /// Fill in the endpoint for this run: flags first, then the config file,
    /// then ask.
    fn resolve_endpoint(
        &self,
        context: &CliContext,
        config: &mut HtcConfig,
    ) -> Result<Endpoint> {
        let matches = context.matches;
        if let Some(access_point) =
            self.read_optional_argument_with_regex_validation(matches, "access-point", host_name_regex())?
        {
            config.select_access_point(access_point);
        }
        if let Some(user) =
            self.read_optional_argument_with_regex_validation(matches, "user", user_name_regex())?
        {
            config.set_username(user);
        }
        if let Some(remote_home) = matches.get_one::<String>("remote-home") {
            config.set_remote_home(remote_home.clone());
        }

        if config.access_point().as_deref().unwrap_or_default().is_empty() {
            let access_point = if config.access_points().is_empty() {
                self.prompt_for_input_with_regex_validation("Access point", host_name_regex())?
            } else {
                let index = self.prompt_for_selection(
                    "Select an access point",
                    config.access_points(),
                    0,
                )?;
                config.access_points()[index].clone()
            };
            config.select_access_point(access_point);
        }
        if config.username().as_deref().unwrap_or_default().is_empty() {
            let user = self.prompt_for_input_with_regex_validation(
                "User name on the access point",
                user_name_regex(),
            )?;
            config.set_username(user);
        }

        config
            .endpoint()
            .ok_or_else(|| CommandErrors::RequiredUserInputMissing("access point".into()).into())
    }

    fn descriptors(&self, context: &CliContext) -> Result<Vec<PathBuf>> {
        match context.matches.get_many::<String>("file") {
            Some(files) => Ok(files.map(PathBuf::from).collect()),
            None => Ok(vec![PathBuf::from(
                self.prompt_for_input("Path to the job description")?,
            )]),
        }
    }

    fn report(&self, result: &SubmissionResult) {
        if result.success {
            for line in result.message.lines() {
                println!("* {}", line);
            }
        } else {
            eprintln!("* {}", result.message);
        }
        for warning in &result.warnings {
            eprintln!("! {}", warning);
        }
    }

    /// Print mirrored log lines until the remote side goes away or the user
    /// interrupts.
    async fn follow(&self, workflow: &SubmissionWorkflow, log_source: &mut impl LogSource) {
        let cancel = workflow.cancellation_token();
        if let Some(target) = workflow.tail().and_then(|tail| tail.target()) {
            println!(
                "* following {}:{} (Ctrl-C to stop)",
                target.endpoint(),
                target.remote_log_path()
            );
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = log_source.source() => match next {
                    PartialLogStream::Next(lines) => {
                        for line in lines {
                            println!("{}", line);
                        }
                    }
                    PartialLogStream::End => {
                        println!("* remote log stream ended");
                        break;
                    }
                }
            }
        }
    }

    /// Follow the log if a tail is running, then tear everything down. The
    /// remote kill is issued without waiting for it, so an unreachable
    /// access point cannot hold up exit.
    async fn watch_and_teardown(
        &self,
        workflow: &mut SubmissionWorkflow,
        log_source: &mut impl LogSource,
    ) {
        if workflow.tail().map(|tail| tail.state()) == Some(TailState::Running) {
            self.follow(workflow, log_source).await;
        }
        workflow.shutdown();
    }
}

#[async_trait]
impl<'a> super::Command<'a> for SubmitCommand {
    fn new() -> Self
    where
        Self: Sized,
    {
        Self {}
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        let mut config = config::load(&context.config_path).await?;
        let endpoint = self.resolve_endpoint(context, &mut config)?;
        let remote_home = config.remote_home_for(&endpoint);
        let descriptors = self.descriptors(context)?;

        let transport =
            OpenSshTransport::from_config(&config).wrap_err("Failed setting up the ssh transport")?;
        let (log_sink, mut log_source) = sink::channel(1024);
        let mut workflow = SubmissionWorkflow::new(
            Arc::new(transport),
            config.tools().clone(),
            Box::new(ConsoleObserver),
        )
        .with_log_sink(Box::new(log_sink));

        let cancel = workflow.cancellation_token();
        tokio::task::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupted");
                cancel.cancel();
            }
        });

        let mut failed = 0;
        for descriptor in &descriptors {
            if workflow.cancellation_token().is_cancelled() {
                warn!("interrupted, not submitting {}", descriptor.display());
                break;
            }
            println!("* submitting {} to {}", descriptor.display(), endpoint);
            let result = workflow.submit(descriptor, &endpoint, &remote_home).await;
            self.report(&result);
            if !result.success {
                failed += 1;
            }
        }

        self.watch_and_teardown(&mut workflow, &mut log_source).await;

        if failed > 0 {
            return Err(eyre!(
                "{} of {} submissions failed",
                failed,
                descriptors.len()
            ));
        }
        Ok(())
    }
}

impl<'a> super::Interactive<'a> for SubmitCommand {}
