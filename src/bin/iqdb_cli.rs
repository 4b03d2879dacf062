use std::{
    error::Error,
    io::{self, Write},
    process,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use iqdb_bridge::{Client, ClientConfig, Command, MatchDocument, prompt};
use log::warn;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of the iqdb daemon
    #[arg(env = "IQDB_ADDR", default_value = "iqdb:5566")]
    address: String,
    /// Service name reported for every match
    #[arg(long, env = "SERVICE_NAME", default_value = "iibooru")]
    service: String,
    /// Similarity threshold reported in the document
    #[arg(long, env = "MATCH_TRESHOLD", default_value = "60")]
    threshold: String,
    /// Seconds to wait for each query; 0 waits forever
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ClientConfig {
        timeout: Some(Duration::from_secs(cli.timeout)),
        ..ClientConfig::default()
    };
    let client = Arc::new(Client::connect_with(cli.address.as_str(), config)?);

    let handle = Arc::clone(&client);
    ctrlc::set_handler(move || {
        handle.shutdown();
        process::exit(130);
    })?;

    let stdin = io::stdin();
    loop {
        let cmd = match prompt(stdin.lock(), io::stdout().lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let query = match cmd {
            Command::Exit => break,
            Command::Query(query) => query,
        };

        match query.run(&client) {
            Ok(matches) => {
                let doc = MatchDocument {
                    service: &cli.service,
                    threshold: &cli.threshold,
                    matches: &matches,
                };
                let mut stdout = io::stdout().lock();
                doc.write_to(&mut stdout)?;
                writeln!(stdout)?;
            }
            Err(e) => eprintln!("query error: {e}"),
        }

        if !client.is_open() {
            warn!("connection to {} lost", client.peer_addr());
            break;
        }
    }

    // the interrupt handler keeps its own reference, so the client is never dropped here
    client.shutdown();

    Ok(())
}
