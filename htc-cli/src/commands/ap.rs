use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::Result;
use libhtc::config::HtcConfig;
use libhtc::log::*;

use super::{CliContext, CommandErrors, Interactive};
use crate::config;

pub struct AccessPointCommand;

impl AccessPointCommand {
    async fn subcommand_list<'a>(&self, context: &'a CliContext<'a>) -> Result<()> {
        let config = config::load(&context.config_path).await?;
        if config.access_points().is_empty() {
            println!("* no access points configured");
            return Ok(());
        }
        println!("* access points:");
        for access_point in config.access_points() {
            let marker = if config.access_point().as_ref() == Some(access_point) {
                "*"
            } else {
                " "
            };
            println!("{} {}", marker, access_point);
        }
        Ok(())
    }

    async fn subcommand_select<'a>(
        &self,
        context: &'a CliContext<'a>,
        matches: &ArgMatches,
    ) -> Result<()> {
        let mut config = config::load(&context.config_path).await?;
        let access_point = match matches.get_one::<String>("name") {
            Some(name) => name.clone(),
            None => self.pick(&config)?,
        };
        config.select_access_point(access_point.as_str());
        config::save(&context.config_path, &config).await?;
        info!("selected access point {}", access_point);
        println!("* access point: {}", access_point);
        Ok(())
    }

    fn pick(&self, config: &HtcConfig) -> Result<String> {
        if config.access_points().is_empty() {
            return Err(CommandErrors::NoAccessPoints.into());
        }
        let current = config
            .access_point()
            .as_ref()
            .and_then(|current| config.access_points().iter().position(|ap| ap == current))
            .unwrap_or(0);
        let index =
            self.prompt_for_selection("Select an access point", config.access_points(), current)?;
        Ok(config.access_points()[index].clone())
    }
}

#[async_trait]
impl<'a> super::Command<'a> for AccessPointCommand {
    fn new() -> Self
    where
        Self: Sized,
    {
        Self {}
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        match context.matches.subcommand() {
            Some(("list", matches)) => {
                self.subcommand_list(&context.with_matches(matches)).await?;
            }
            Some(("select", matches)) => {
                self.subcommand_select(context, matches).await?;
            }
            Some((name, _)) => return Err(CommandErrors::InvalidSubcommand(name.to_string()).into()),
            None => return Err(CommandErrors::NoSubcommandProvided.into()),
        }
        Ok(())
    }
}

impl<'a> super::Interactive<'a> for AccessPointCommand {}
