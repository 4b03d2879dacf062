pub mod cli;
pub mod command;
pub mod protocol;
pub mod render;

pub use cli::prompt;
pub use command::{Command, CommandError};
pub use protocol::{Client, ClientConfig, ClientError, QueryResult};
pub use render::MatchDocument;
