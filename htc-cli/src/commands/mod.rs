use std::path::PathBuf;

use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::{Result, WrapErr};
use dialoguer::{FuzzySelect, Input};
use regex::Regex;
use thiserror::Error;

pub mod ap;
pub mod submit;

#[derive(Error, Debug)]
pub enum CommandErrors {
    #[error("Prompt interaction failed.")]
    PromptInteractionFailed(
        #[from]
        #[source]
        dialoguer::Error,
    ),
    #[error("Required user input `{0}` is missing.")]
    RequiredUserInputMissing(String),
    #[error("Argument `{0}` failed validation `{1}`")]
    InputValidationFailure(String, String),
    #[error("No access points are configured. Add one with `htc ap select <name>`.")]
    NoAccessPoints,
    #[error("Invalid subcommand `{0}`.")]
    InvalidSubcommand(String),
    #[error("No subcommand provided.")]
    NoSubcommandProvided,
}

pub struct CliContext<'a> {
    pub config_path: PathBuf,
    pub matches: &'a ArgMatches,
}

impl<'a> CliContext<'a> {
    pub fn new(config_path: PathBuf, matches: &'a ArgMatches) -> Self {
        Self {
            config_path,
            matches,
        }
    }

    pub fn with_matches(&self, matches: &'a ArgMatches) -> Self {
        Self {
            config_path: self.config_path.clone(),
            matches,
        }
    }
}

#[async_trait]
pub trait Command<'a> {
    fn new() -> Self
    where
        Self: Sized;

    async fn run(&self, context: &'a CliContext) -> Result<()>;
}

pub trait Interactive<'a> {
    fn prompt_for_input(&self, message: &'a str) -> Result<String> {
        Input::<String>::new()
            .with_prompt(message)
            .interact()
            .map_err(CommandErrors::PromptInteractionFailed)
            .wrap_err("Prompting user input failed.")
    }

    fn prompt_for_input_with_validator<V>(&self, message: &'a str, validator: V) -> Result<String>
    where
        V: FnMut(&String) -> Result<(), CommandErrors> + 'a,
    {
        Input::<String>::new()
            .with_prompt(message)
            .validate_with(validator)
            .interact()
            .map_err(CommandErrors::PromptInteractionFailed)
            .wrap_err("Prompting user input with validator failed.")
    }

    fn prompt_for_input_with_regex_validation(
        &self,
        message: &'a str,
        regex: &'a Regex,
    ) -> Result<String> {
        self.prompt_for_input_with_validator(message, |input: &String| {
            if regex.is_match(input) {
                Ok(())
            } else {
                Err(CommandErrors::InputValidationFailure(
                    message.to_string(),
                    regex.as_str().to_string(),
                ))
            }
        })
    }

    /// Pick one of `items` with a fuzzy finder, starting on `default`.
    fn prompt_for_selection(
        &self,
        message: &'a str,
        items: &[String],
        default: usize,
    ) -> Result<usize> {
        FuzzySelect::new()
            .with_prompt(message)
            .items(items)
            .default(default)
            .interact()
            .map_err(CommandErrors::PromptInteractionFailed)
            .wrap_err("Prompting user selection failed.")
    }

    /// Read an optional argument from the CLI args, validating it against
    /// `regex` if present.
    fn read_optional_argument_with_regex_validation(
        &self,
        arg_matches: &'a ArgMatches,
        id: &'a str,
        regex: &'a Regex,
    ) -> Result<Option<String>> {
        match arg_matches.get_one::<String>(id) {
            Some(arg) if regex.is_match(arg) => Ok(Some(arg.clone())),
            Some(_) => Err(
                CommandErrors::InputValidationFailure(id.into(), regex.as_str().into()).into(),
            ),
            None => Ok(None),
        }
    }
}
