#![forbid(unsafe_code)]

use color_eyre::eyre::Result;
use clap::{command, Arg, ArgAction};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::SubscriberInitExt;

use crate::commands::Command;

mod commands;
mod config;

use libhtc::log::*;

#[tokio::main]
async fn main() -> Result<()> {
    install_color_eyre()?;

    // Command configuration
    let matches = command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Turn debugging information on. Overrides -q. Can specify up to -vvvv.")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Silence all output. Overridden by -v.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the config file. Defaults to config.yaml in the user config directory.")
                .global(true),
        )
        .subcommand(
            command!("submit")
                .about("Submit job descriptions to the access point and follow the first job's log.")
                .arg(
                    Arg::new("file")
                        .help("Path to a job description. Can be given more than once. Prompted for if missing.")
                        .short('f')
                        .long("file")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("access-point")
                        .help("Access point to submit to, for this run only.")
                        .short('a')
                        .long("access-point"),
                )
                .arg(
                    Arg::new("user")
                        .help("User name on the access point, for this run only.")
                        .short('u')
                        .long("user"),
                )
                .arg(
                    Arg::new("remote-home")
                        .help("Remote directory to copy job descriptions into. Defaults to /home/<user>.")
                        .long("remote-home"),
                ),
        )
        .subcommand(
            command!("ap")
                .about("Manage access points.")
                .subcommand(command!("list").about("List known access points."))
                .subcommand(
                    command!("select")
                        .about("Select the access point to submit to.")
                        .arg(
                            Arg::new("name")
                                .help("Access point host name. Picked interactively if missing."),
                        ),
                )
                .subcommand_required(true),
        )
        .subcommand_required(true)
        .get_matches();

    // Set up logging
    let logging_config = tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::new(
            time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        ))
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .compact();

    let quiet = matches.get_flag("quiet");
    let verbose = matches.get_count("verbose") as usize;
    let logging_config = if quiet && verbose == 0 {
        logging_config.with_max_level(LevelFilter::ERROR)
    } else if verbose > 0 {
        let level = match verbose {
            1 => LevelFilter::WARN,
            2 => LevelFilter::INFO,
            3 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        };
        logging_config.with_max_level(level)
    } else {
        logging_config.with_max_level(LevelFilter::ERROR)
    };

    let subscriber = logging_config.finish();
    subscriber.init();

    // Run the commands
    if let Some((subcommand, matches)) = matches.subcommand() {
        let config_path = match matches.get_one::<String>("config") {
            Some(path) => path.into(),
            None => config::default_config_path()?,
        };
        let ctx = commands::CliContext::new(config_path, matches);
        debug!(
            "matched subcommand {} with matches: {:?}",
            &subcommand,
            &matches.ids().map(|id| id.as_str()).collect::<Vec<_>>()
        );
        match subcommand {
            "submit" => commands::submit::SubmitCommand::new().run(&ctx).await?,
            "ap" => commands::ap::AccessPointCommand::new().run(&ctx).await?,
            _ => return Err(commands::CommandErrors::InvalidSubcommand(subcommand.into()).into()),
        }
    }
    Ok(())
}
