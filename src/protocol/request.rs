use std::io::{self, Write};

use super::ClientError;

/// What the daemon should compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// Path of an image readable by the daemon itself.
    Filename(&'a str),
    /// Encoded image sent inline after the request line.
    Data(&'a [u8]),
}

/// Outbound similarity query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query<'a> {
    pub db_id: &'a str,
    pub flags: u32,
    pub num_results: u32,
    pub target: Target<'a>,
}

impl<'a> Query<'a> {
    pub fn filename(db_id: &'a str, flags: u32, num_results: u32, filename: &'a str) -> Self {
        Self {
            db_id,
            flags,
            num_results,
            target: Target::Filename(filename),
        }
    }

    pub fn data(db_id: &'a str, flags: u32, num_results: u32, data: &'a [u8]) -> Self {
        Self {
            db_id,
            flags,
            num_results,
            target: Target::Data(data),
        }
    }

    /// Reject fields that would break the line framing.
    pub fn validate(&self) -> Result<(), ClientError> {
        validate_token("database id", self.db_id)?;
        if let Target::Filename(filename) = self.target {
            validate_token("filename", filename)?;
            // `:<len>` announces an inline payload
            if filename.starts_with(':') {
                return Err(ClientError::InvalidRequest(format!(
                    "filename '{filename}' starts with ':'"
                )));
            }
        }
        Ok(())
    }

    /// Write the request line, followed by the payload for [`Target::Data`].
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let buf = match self.target {
            Target::Filename(filename) => format!(
                "query {} {} {} {}\n",
                self.db_id, self.flags, self.num_results, filename
            )
            .into_bytes(),
            Target::Data(data) => {
                let mut buf = format!(
                    "query {} {} {} :{}\n",
                    self.db_id,
                    self.flags,
                    self.num_results,
                    data.len()
                )
                .into_bytes();
                buf.extend_from_slice(data);
                buf
            }
        };

        writer.write_all(&buf)?;
        writer.flush()
    }
}

fn validate_token(field: &str, value: &str) -> Result<(), ClientError> {
    if value.is_empty() {
        return Err(ClientError::InvalidRequest(format!("{field} is empty")));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ClientError::InvalidRequest(format!(
            "{field} '{value}' contains whitespace"
        )));
    }
    Ok(())
}
