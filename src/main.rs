//! assoc-graph command-line tool
//!
//! Offline operations over storage dump files: dependency sorting, inspection
//! and last-writer-wins merging.

use std::path::{Path, PathBuf};

use assoc_graph::core::{load_config_or_default, Config};
use assoc_graph::{cli, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::info;

fn main() -> Result<()> {
    let matches = Command::new("assoc-graph")
        .version(assoc_graph::VERSION)
        .about("Associative graph store tooling.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Configuration file path")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .global(true)
                .help("Log level (trace, debug, info, warn, error)")
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("sort")
                .about("Print a dump with its links in dependency order")
                .arg(Arg::new("dump").value_name("DUMP").required(true))
        )
        .subcommand(
            Command::new("inspect")
                .about("Restore a dump into a fresh graph and print counts by type")
                .arg(Arg::new("dump").value_name("DUMP").required(true))
        )
        .subcommand(
            Command::new("merge")
                .about("Fold dumps last-writer-wins into one")
                .arg(
                    Arg::new("dumps")
                        .value_name("DUMP")
                        .required(true)
                        .action(ArgAction::Append)
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .required(true)
                        .help("Where to write the merged dump")
                )
        )
        .get_matches();

    // Load configuration
    let mut config = load_config_or_default(matches.get_one::<String>("config").map(Path::new));

    // Apply CLI overrides
    apply_cli_overrides(&mut config, &matches)?;
    assoc_graph::init(&config)?;

    match matches.subcommand() {
        Some(("sort", sub)) => println!("{}", cli::run_sort(required(sub, "dump")?)?),
        Some(("inspect", sub)) => print!("{}", cli::run_inspect(required(sub, "dump")?)?),
        Some(("merge", sub)) => {
            let inputs: Vec<PathBuf> = sub.get_many::<String>("dumps").into_iter().flatten().map(PathBuf::from).collect();
            let output = required(sub, "output")?;
            let report = cli::run_merge(&inputs, &output)?;
            info!(?report, output = %output.display(), "merge complete");
            println!("{}", serde_json::to_string(&report)?);
        }
        _ => return Err(assoc_graph::Error::invalid_argument("unknown command")),
    }

    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &ArgMatches) -> Result<()> {
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    config.validate()
}

fn required(matches: &ArgMatches, name: &str) -> Result<PathBuf> {
    matches
        .get_one::<String>(name)
        .map(PathBuf::from)
        .ok_or_else(|| assoc_graph::Error::invalid_argument(format!("missing argument: {}", name)))
}
