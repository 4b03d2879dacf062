use std::{
    error::Error,
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;
use iqdb_bridge::{
    ClientConfig, MatchDocument,
    command::read_payload,
    protocol::{Query, query_once},
};
use log::info;

/// Search the iqdb daemon for images similar to PATH and print the matches as XML.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Image to search with
    path: PathBuf,
    /// Address of the iqdb daemon
    #[arg(short, long, env = "IQDB_ADDR", default_value = "iqdb:5566")]
    address: String,
    /// Database to search
    #[arg(long, default_value = "0")]
    db: String,
    /// Query flags passed to the daemon
    #[arg(long, default_value_t = 0)]
    flags: u32,
    /// Maximum number of matches
    #[arg(short = 'n', long, default_value_t = 10)]
    results: u32,
    /// Service name reported for every match
    #[arg(long, env = "SERVICE_NAME", default_value = "iibooru")]
    service: String,
    /// Similarity threshold reported in the document
    #[arg(long, env = "MATCH_TRESHOLD", default_value = "60")]
    threshold: String,
    /// Seconds to wait for the daemon; 0 waits forever
    #[arg(long, default_value_t = 30)]
    timeout: u64,
    /// Treat PATH as a file on the daemon's side instead of uploading it
    #[arg(long)]
    remote: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ClientConfig {
        timeout: Some(Duration::from_secs(cli.timeout)),
        ..ClientConfig::default()
    };

    let filename;
    let data;
    let query = if cli.remote {
        filename = cli.path.to_string_lossy().into_owned();
        Query::filename(&cli.db, cli.flags, cli.results, &filename)
    } else {
        data = read_payload(&cli.path)?;
        Query::data(&cli.db, cli.flags, cli.results, &data)
    };

    let matches = query_once(cli.address.as_str(), config, &query)?;
    info!("{} matches from {}", matches.len(), cli.address);

    let doc = MatchDocument {
        service: &cli.service,
        threshold: &cli.threshold,
        matches: &matches,
    };
    let mut stdout = io::stdout().lock();
    doc.write_to(&mut stdout)?;
    writeln!(stdout)?;

    Ok(())
}
