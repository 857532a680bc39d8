use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use log::info;
use structopt::StructOpt;

mod config;
mod db;
mod import;
mod pages;
mod relay;
mod schema;
mod web;

#[derive(Debug, StructOpt)]
#[structopt(name = "meshdash", about = "Meshtastic telemetry dashboard")]
struct Options {
    /// Configuration file; missing files fall back to built-in defaults
    #[structopt(short, long, default_value = "config.toml", parse(from_os_str))]
    config: PathBuf,

    #[structopt(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Serve the dashboard, graphs and list viewers (default)
    Serve,
    /// Replace the raw packet table with the packets of a JSON Lines file
    Import {
        /// Append instead of truncating the table first
        #[structopt(long)]
        keep_existing: bool,
        /// Defaults to import.jsonl_path from the configuration
        #[structopt(parse(from_os_str))]
        path: Option<PathBuf>,
    },
}

#[actix_web::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let options = Options::from_args();
    let config = config::Config::load(&options.config)?;

    match options.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let connector = Arc::new(db::PgConnector::new(config.database.url.clone()));
            web::new_http_server(web::AppState::new(config, connector)).await?;
        }
        Command::Import {
            keep_existing,
            path,
        } => {
            let path = path.unwrap_or_else(|| PathBuf::from(&config.import.jsonl_path));
            let packets = import::read_file(&path)?;

            let mut db = db::Db::connect(&config.database.url)?;
            let inserted = import::store(&mut db, &packets, !keep_existing)?;
            info!(
                "imported {inserted} packets from {} ({} lines skipped)",
                path.display(),
                packets.skipped.len()
            );
        }
    }

    Ok(())
}
