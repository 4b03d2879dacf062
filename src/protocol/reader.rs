//! Background reading of the daemon's response stream.
//!
//! A [`LineReader`] reassembles logical lines regardless of how the transport splits
//! them into physical reads. [`run`] is the body of the reader thread: it decodes every
//! line and publishes the responses, in order, onto the bounded delivery queue shared
//! with the [`Client`](super::Client).
//!
//! The reader owns the only [`SyncSender`] of the queue. When it stops, for whatever
//! reason, the sender is dropped and every waiter on the queue observes the
//! disconnection instead of blocking forever.
use std::{
    fmt,
    io::{self, BufRead, BufReader, Read},
    sync::mpsc::SyncSender,
    thread::{self, JoinHandle},
};

use log::{debug, trace, warn};

use super::Response;

const READER_THREAD_NAME: &str = "iqdb-reader";

/// Splits a byte stream into newline terminated logical lines.
pub struct LineReader<R: BufRead> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: Read> LineReader<BufReader<R>> {
    pub fn new(source: R) -> Self {
        Self::from_buffered(BufReader::new(source))
    }
}

impl<R: BufRead> LineReader<R> {
    pub fn from_buffered(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Read the next logical line without its terminator.
    ///
    /// Fragments are accumulated until a newline arrives, so a line may span any number
    /// of reads. A trailing fragment without newline is returned as a final line before
    /// `Ok(None)` signals the end of the stream.
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let read = self.inner.read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

/// Why the reader stopped.
#[derive(Debug)]
pub enum ReaderExit {
    /// Daemon closed the connection.
    Eof,
    /// Reading from the socket failed.
    Io(io::Error),
    /// Nobody is listening on the delivery queue anymore.
    ConsumerGone,
}

impl fmt::Display for ReaderExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderExit::Eof => write!(f, "connection closed by daemon"),
            ReaderExit::Io(e) => write!(f, "read error: {e}"),
            ReaderExit::ConsumerGone => write!(f, "delivery queue dropped"),
        }
    }
}

/// Spawn the reader thread for `source`.
pub fn spawn<R>(source: R, queue: SyncSender<Response>) -> io::Result<JoinHandle<ReaderExit>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(READER_THREAD_NAME.to_string())
        .spawn(move || {
            let exit = run(source, queue);
            match exit {
                ReaderExit::Eof | ReaderExit::ConsumerGone => debug!("reader stopped: {exit}"),
                ReaderExit::Io(_) => warn!("reader stopped: {exit}"),
            }
            exit
        })
}

/// Decode lines from `source` and push them onto `queue` until either side goes away.
///
/// Pushing blocks while the queue is full.
pub fn run<R: Read>(source: R, queue: SyncSender<Response>) -> ReaderExit {
    let mut lines = LineReader::new(source);

    loop {
        let line = match lines.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => return ReaderExit::Eof,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return ReaderExit::Io(e),
        };
        trace!("<- {line}");

        let Some(resp) = Response::decode(&line) else {
            debug!("dropping undecodable line {line:?}");
            continue;
        };

        if queue.send(resp).is_err() {
            return ReaderExit::ConsumerGone;
        }
    }
}
