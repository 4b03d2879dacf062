//! CLI utilities for the iqdb shell.
//!
//! The utilities present in this module can be used to build an interactive front-end
//! on top of a persistent [`Client`](crate::protocol::Client).
use std::io::{BufRead, Write};

use crate::command::{Command, CommandError};

/// Prompt user for a shell command.
///
/// End of input is treated as [`Command::Exit`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }

    Command::try_from(s.as_str())
}
