//! iqdb line protocol.
//!
//! This module implements the client side of the private, line-oriented TCP protocol
//! spoken by the iqdb image similarity daemon.
//!
//! # Overview
//!
//! A connection is owned by a [`Client`]. Next to it runs a dedicated reader thread which
//! reassembles newline terminated lines, decodes them into [`Response`] values and hands
//! them over, in arrival order, through a bounded queue. Queries are written by the caller
//! and their results are gathered from that queue until the daemon signals readiness
//! again.
//!
//! ```text
//! caller --query--> socket --lines--> reader thread --Response--> queue --> caller
//! ```
//!
//! # Wire Format
//!
//! - Request: `query <db> <flags> <num_results> <filename>\n`, or
//!   `query <db> <flags> <num_results> :<len>\n` followed by `len` raw bytes.
//! - Response: `<code> <field> <field> ...\n` where `code` is one of the `CODE_*`
//!   constants in [`response`].
//! - A `000` line announces readiness: once after connecting, and after every query.
//!
//! # Key Components
//!
//! - [`Response`]: Decoded daemon line.
//! - [`Query`]: Outbound request.
//! - [`Client`]: Connection owner; serializes queries and aggregates their results.
//!
//! # See Also
//!
//! - [`render`](crate::render): Turns [`QueryResult`]s into the gateway's XML document.
mod client;
mod reader;
mod request;
pub mod response;

pub use client::{
    Client, ClientConfig, ClientError, QueryResult, State, query_by_data, query_by_filename,
    query_once,
};
pub use reader::{LineReader, ReaderExit};
pub use request::{Query, Target};
pub use response::{Duplicate, Response};
