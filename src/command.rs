//! Interactive shell commands.
//!
//! This module defines the [`Command`] enum parsed from the lines a user types into the
//! `iqdb_cli` shell, and executes them against a persistent [`Client`].
//!
//! # Overview
//! Supported commands:
//!
//! - `.exit`: Close the connection and leave the shell.
//! - `query <db> <flags> <num_results> <filename>`: Search with an image the daemon can
//!   read from its own filesystem.
//! - `upload <db> <flags> <num_results> <path>`: Read a local image and send its bytes.
//!
//! # Example
//! ```rust
//! use iqdb_bridge::command::{Command, QueryCommand, Source};
//!
//! let cmd = Command::try_from("query 0 0 10 /srv/img/cat.jpg").unwrap();
//! assert_eq!(
//!     cmd,
//!     Command::Query(QueryCommand {
//!         db_id: "0".to_string(),
//!         flags: 0,
//!         num_results: 10,
//!         source: Source::Remote("/srv/img/cat.jpg".to_string()),
//!     })
//! );
//! ```
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::debug;
use thiserror::Error;

use crate::protocol::{Client, ClientError, QueryResult};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("failed to read '{path}': {error}")]
    Payload { path: PathBuf, error: io::Error },

    #[error("input error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("no command provided")]
    Empty,
}

/// Where the query image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Filename resolved by the daemon.
    Remote(String),
    /// Local file uploaded inline.
    Upload(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCommand {
    pub db_id: String,
    pub flags: u32,
    pub num_results: u32,
    pub source: Source,
}

impl QueryCommand {
    pub fn run(&self, client: &Client) -> Result<Vec<QueryResult>, CommandError> {
        let results = match &self.source {
            Source::Remote(filename) => {
                client.query_by_filename(&self.db_id, self.flags, self.num_results, filename)?
            }
            Source::Upload(path) => {
                let data = read_payload(path)?;
                debug!("uploading {} bytes from {path:?}", data.len());
                client.query_by_data(&self.db_id, self.flags, self.num_results, &data)?
            }
        };
        Ok(results)
    }
}

/// Read an image file to upload.
pub fn read_payload(path: &Path) -> Result<Vec<u8>, CommandError> {
    fs::read(path).map_err(|error| CommandError::Payload {
        path: path.to_path_buf(),
        error,
    })
}

/// User supplied shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Query(QueryCommand),
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parts = value.split_whitespace().collect::<Vec<&str>>();

        match parts.as_slice() {
            [] => Err(CommandError::Empty),
            [".exit"] => Ok(Command::Exit),
            [name @ ("query" | "upload"), args @ ..] => {
                let [db_id, flags, num_results, target] = args else {
                    return Err(CommandError::InvalidCommandArguments {
                        command: name.to_string(),
                        reason: format!(
                            "requires db, flags, result count and image. Example: {name} 0 0 10 image.jpg"
                        ),
                    });
                };

                let number = |field: &str, value: &str| {
                    value
                        .parse::<u32>()
                        .map_err(|_| CommandError::InvalidCommandArguments {
                            command: name.to_string(),
                            reason: format!("{field} should be a non-negative integer"),
                        })
                };

                let source = if *name == "query" {
                    Source::Remote(target.to_string())
                } else {
                    Source::Upload(PathBuf::from(*target))
                };

                Ok(Command::Query(QueryCommand {
                    db_id: db_id.to_string(),
                    flags: number("flags", *flags)?,
                    num_results: number("result count", *num_results)?,
                    source,
                }))
            }
            _ => Err(CommandError::UnrecognizedCommand(value.trim().to_string())),
        }
    }
}
