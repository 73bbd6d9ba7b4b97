use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod common;
mod config;
mod logging;
mod parse;
mod query;
mod sql;

use config::AppConfig;

/// Parse OData request URIs, show their SQL and run them.
#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(name = "odata")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved request as JSON
    Parse(parse::ParseArgs),
    /// Print the SQL statements of a request
    Sql(sql::SqlArgs),
    /// Run a request against the configured database
    Query(query::QueryArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    common::check_config_path(cli.config.as_deref())?;
    let config = AppConfig::load(cli.config.as_deref())?;
    logging::init(&config.logging, cli.verbose)?;

    if cli.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command {
        Some(Commands::Parse(args)) => args.run(&config),
        Some(Commands::Sql(args)) => args.run(&config),
        Some(Commands::Query(args)) => args.run(&config).await,
        None => anyhow::bail!("no command given; see --help"),
    }
}
