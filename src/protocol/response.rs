//! Responses sent by the daemon.
//!
//! Every line the daemon writes starts with a three digit status code followed by
//! whitespace separated fields. [`Response::decode`] turns a single line into a typed
//! [`Response`]; lines that cannot be understood are dropped rather than reported, the
//! daemon is expected to still emit a terminating [`Response::Ready`].

use log::trace;

pub const CODE_READY: u64 = 0;
pub const CODE_INFO: u64 = 100;
pub const CODE_INFO_PROPERTY: u64 = 101;
pub const CODE_DB_ENTRY: u64 = 102;
pub const CODE_QUERY_RESULT: u64 = 200;
pub const CODE_MULTI_QUERY_RESULT: u64 = 201;
pub const CODE_DUP_QUERY_RESULT: u64 = 202;
pub const CODE_ERROR: u64 = 300;
pub const CODE_EXCEPTION: u64 = 301;
pub const CODE_FATAL: u64 = 302;

/// Single candidate of a duplicate query.
#[derive(Debug, Clone, PartialEq)]
pub struct Duplicate {
    pub img_id: u64,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Daemon is idle and accepting commands. Also terminates a query's results.
    Ready,
    Info {
        text: String,
    },
    InfoProperty {
        key: String,
        value: String,
    },
    DbEntry {
        db_id: String,
        db_file: String,
    },
    QueryResult {
        img_id: u64,
        score: f64,
        width: i64,
        height: i64,
    },
    MultiQueryResult {
        db_id: String,
        img_id: u64,
        score: f64,
        width: i64,
        height: i64,
    },
    /// Reserved by the protocol; never produced by [`Response::decode`].
    DupQueryResult {
        orig_img_id: u64,
        deviation: f64,
        dups: Vec<Duplicate>,
    },
    Error {
        text: String,
    },
    Exception {
        name: String,
        text: String,
    },
    Fatal {
        name: String,
        text: String,
    },
}

impl Response {
    /// Protocol status code of this response.
    pub fn code(&self) -> u64 {
        match self {
            Response::Ready => CODE_READY,
            Response::Info { .. } => CODE_INFO,
            Response::InfoProperty { .. } => CODE_INFO_PROPERTY,
            Response::DbEntry { .. } => CODE_DB_ENTRY,
            Response::QueryResult { .. } => CODE_QUERY_RESULT,
            Response::MultiQueryResult { .. } => CODE_MULTI_QUERY_RESULT,
            Response::DupQueryResult { .. } => CODE_DUP_QUERY_RESULT,
            Response::Error { .. } => CODE_ERROR,
            Response::Exception { .. } => CODE_EXCEPTION,
            Response::Fatal { .. } => CODE_FATAL,
        }
    }

    /// Decode one logical line.
    ///
    /// Returns `None` when the line is malformed: unparsable status code, unknown code,
    /// missing fields or a numeric field that does not parse.
    pub fn decode(line: &str) -> Option<Response> {
        let parts = line.split_whitespace().collect::<Vec<&str>>();
        let code = parts.first()?.parse::<u64>().ok()?;

        let resp = match code {
            CODE_READY => Response::Ready,
            CODE_INFO => Response::Info {
                text: parts[1..].join(" "),
            },
            CODE_INFO_PROPERTY => {
                let (key, value) = parts.get(1)?.split_once('=')?;
                Response::InfoProperty {
                    key: key.to_string(),
                    value: value.to_string(),
                }
            }
            CODE_DB_ENTRY => {
                if parts.len() < 3 {
                    return None;
                }
                Response::DbEntry {
                    db_id: parts[1].to_string(),
                    db_file: parts[2].to_string(),
                }
            }
            CODE_QUERY_RESULT => {
                if parts.len() < 5 {
                    return None;
                }
                Response::QueryResult {
                    img_id: parts[1].parse().ok()?,
                    score: parts[2].parse().ok()?,
                    width: parts[3].parse().ok()?,
                    height: parts[4].parse().ok()?,
                }
            }
            CODE_MULTI_QUERY_RESULT => {
                if parts.len() < 6 {
                    return None;
                }
                Response::MultiQueryResult {
                    db_id: parts[1].to_string(),
                    img_id: parts[2].parse().ok()?,
                    score: parts[3].parse().ok()?,
                    width: parts[4].parse().ok()?,
                    height: parts[5].parse().ok()?,
                }
            }
            CODE_ERROR => Response::Error {
                text: parts[1..].join(" "),
            },
            CODE_EXCEPTION | CODE_FATAL => {
                if parts.len() < 2 {
                    return None;
                }
                // `<code> <name> <message...>`; the name is not repeated in the text
                let name = parts[1].to_string();
                let text = parts[2..].join(" ");
                if code == CODE_EXCEPTION {
                    Response::Exception { name, text }
                } else {
                    Response::Fatal { name, text }
                }
            }
            _ => {
                trace!("ignoring line with unhandled code {code}");
                return None;
            }
        };

        Some(resp)
    }
}
