//! CLI argument parsing and validation module
//!
//! Handles command-line interface using clap, including:
//! - `watch`: print process start/stop events from the system source
//! - `stream`: forward bridge maps from the async event stream
//! - `config`: show the effective configuration
//! - Help and version commands

use crate::constants::{POLLING_INTERVAL_MAX, POLLING_INTERVAL_MIN};
use crate::models::MonitorError;
use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Default bound of the stream channel
const DEFAULT_STREAM_BUFFER: usize = 256;

/// Options for `procwatch watch`
#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    pub json_output: bool,
    pub push_mode: bool,
    /// Overrides `[source] polling_interval`
    pub interval: Option<f64>,
    pub config_path: Option<PathBuf>,
    pub max_events: Option<u64>,
    pub verbose: bool,
}

/// Parsed command line
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Watch(WatchOptions),
    Stream {
        config_path: Option<PathBuf>,
        buffer: usize,
    },
    Config {
        config_path: Option<PathBuf>,
    },
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Configuration file (TOML)")
        .value_parser(clap::value_parser!(PathBuf))
}

pub fn build_cli() -> Command {
    Command::new("procwatch")
        .version(env!("PROCWATCH_VERSION"))
        .about("Watch process start and stop events")
        .long_about("Subscribes to process lifecycle notifications and delivers them through a pull queue or a push callback.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("watch")
                .about("Print process start/stop events until interrupted")
                .arg(
                    Arg::new("json")
                        .short('j')
                        .long("json")
                        .help("Output in JSON format (one object per line)")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("push")
                        .long("push")
                        .help("Deliver events through a callback instead of the pull queue")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("SECONDS")
                        .help("Process table polling interval in seconds (0.1 - 300.0)")
                        .value_parser(clap::value_parser!(f64)),
                )
                .arg(
                    Arg::new("max-events")
                        .short('n')
                        .long("max-events")
                        .value_name("COUNT")
                        .help("Exit after this many events")
                        .value_parser(clap::value_parser!(u64).range(1..)),
                )
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .help("Log session and per-event diagnostics")
                        .action(ArgAction::SetTrue),
                )
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("stream")
                .about("Print bridge maps from the async event stream until interrupted")
                .arg(
                    Arg::new("buffer")
                        .long("buffer")
                        .value_name("COUNT")
                        .help("Events buffered between the monitor and the stream")
                        .default_value("256")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration as TOML")
                .arg(config_arg()),
        )
}

/// Parse process arguments
pub fn parse_args() -> Result<CliCommand> {
    from_matches(&build_cli().get_matches())
}

/// Parse an explicit argument list
pub fn parse_from<I, T>(args: I) -> Result<CliCommand>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_cli().try_get_matches_from(args)?;
    from_matches(&matches)
}

fn from_matches(matches: &ArgMatches) -> Result<CliCommand> {
    match matches.subcommand() {
        Some(("watch", sub)) => {
            let interval = sub.get_one::<f64>("interval").copied();
            if let Some(interval) = interval {
                if !(POLLING_INTERVAL_MIN..=POLLING_INTERVAL_MAX).contains(&interval) {
                    return Err(MonitorError::InvalidInterval(interval).into());
                }
            }

            Ok(CliCommand::Watch(WatchOptions {
                json_output: sub.get_flag("json"),
                push_mode: sub.get_flag("push"),
                interval,
                config_path: sub.get_one::<PathBuf>("config").cloned(),
                max_events: sub.get_one::<u64>("max-events").copied(),
                verbose: sub.get_flag("verbose"),
            }))
        }
        Some(("stream", sub)) => Ok(CliCommand::Stream {
            config_path: sub.get_one::<PathBuf>("config").cloned(),
            buffer: sub
                .get_one::<usize>("buffer")
                .copied()
                .unwrap_or(DEFAULT_STREAM_BUFFER)
                .max(1),
        }),
        Some(("config", sub)) => Ok(CliCommand::Config {
            config_path: sub.get_one::<PathBuf>("config").cloned(),
        }),
        Some((other, _)) => anyhow::bail!("Unknown command: {}", other),
        None => anyhow::bail!("No command given"),
    }
}
