use std::{
    io,
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::{
        Mutex, MutexGuard, PoisonError,
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};
use thiserror::Error;

use super::{
    Query, Response,
    reader::{self, ReaderExit},
};

/// Upper bound on how long we wait for the daemon to finish a failed query.
const RESYNC_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("error: {text}")]
    Daemon { text: String },

    #[error("exception {name}: {text}")]
    Exception { name: String, text: String },

    #[error("fatal {name}: {text}")]
    Fatal { name: String, text: String },

    #[error("invalid response")]
    InvalidResponse,

    #[error("timed out waiting for the daemon")]
    Timeout,

    #[error("connection to the daemon was lost")]
    Disconnected,

    #[error("connection is closed")]
    Closed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Connection settings. A `None` (or zero) duration waits indefinitely.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Option<Duration>,
    /// Deadline for the handshake and for each query, from the request write until the
    /// terminating response.
    pub timeout: Option<Duration>,
    /// Responses buffered between the reader thread and the caller.
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            timeout: Some(Duration::from_secs(30)),
            queue_capacity: 4,
        }
    }
}

/// Single match returned by a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    pub img_id: u64,
    pub score: f64,
    pub width: i64,
    pub height: i64,
}

/// Progress of draining one query's responses.
#[derive(Debug)]
pub enum State {
    Collecting(Vec<QueryResult>),
    Done(Vec<QueryResult>),
    Failed(ClientError),
}

impl State {
    /// Apply the next response. `Done` and `Failed` are terminal and ignore further input.
    pub fn apply(self, resp: Response) -> State {
        let mut results = match self {
            State::Collecting(results) => results,
            terminal => return terminal,
        };

        match resp {
            Response::QueryResult {
                img_id,
                score,
                width,
                height,
            }
            | Response::MultiQueryResult {
                img_id,
                score,
                width,
                height,
                ..
            } => {
                results.push(QueryResult {
                    img_id,
                    score,
                    width,
                    height,
                });
                State::Collecting(results)
            }
            Response::Info { .. } | Response::InfoProperty { .. } => State::Collecting(results),
            Response::Ready => State::Done(results),
            Response::Error { text } => State::Failed(ClientError::Daemon { text }),
            Response::Exception { name, text } => {
                State::Failed(ClientError::Exception { name, text })
            }
            Response::Fatal { name, text } => State::Failed(ClientError::Fatal { name, text }),
            other @ (Response::DbEntry { .. } | Response::DupQueryResult { .. }) => {
                warn!("unexpected response code {} during query", other.code());
                State::Failed(ClientError::InvalidResponse)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline(Option<Instant>);

impl Deadline {
    /// A timeout too large to represent never expires.
    fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.and_then(|t| Instant::now().checked_add(t)))
    }

    fn min(self, other: Deadline) -> Deadline {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Deadline(Some(a.min(b))),
            (a, b) => Deadline(a.or(b)),
        }
    }

    fn recv(&self, queue: &Receiver<Response>) -> Result<Response, ClientError> {
        let Some(at) = self.0 else {
            return queue.recv().map_err(|_| ClientError::Disconnected);
        };

        let remaining = at.saturating_duration_since(Instant::now());
        queue.recv_timeout(remaining).map_err(|e| match e {
            RecvTimeoutError::Timeout => ClientError::Timeout,
            RecvTimeoutError::Disconnected => ClientError::Disconnected,
        })
    }
}

struct Session {
    stream: TcpStream,
    responses: Receiver<Response>,
    open: bool,
}

impl Session {
    fn shutdown(&mut self) {
        if self.open {
            warn!("closing daemon connection");
            self.open = false;
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn collect(&mut self, deadline: Deadline) -> Result<Vec<QueryResult>, ClientError> {
        let mut results = Vec::new();

        loop {
            let resp = deadline.recv(&self.responses).inspect_err(|_| self.shutdown())?;
            trace!("query response {resp:?}");

            match State::Collecting(results).apply(resp) {
                State::Collecting(r) => results = r,
                State::Done(r) => return Ok(r),
                State::Failed(ClientError::InvalidResponse) => {
                    self.shutdown();
                    return Err(ClientError::InvalidResponse);
                }
                State::Failed(e) => {
                    self.resync(deadline.min(Deadline::after(Some(RESYNC_GRACE))));
                    return Err(e);
                }
            }
        }
    }

    /// Skip the remainder of a failed query up to its terminating `Ready`.
    fn resync(&mut self, deadline: Deadline) {
        loop {
            match deadline.recv(&self.responses) {
                Ok(Response::Ready) => return,
                Ok(resp) => trace!("discarding {resp:?} after failed query"),
                Err(e) => {
                    debug!("no terminator after failed query: {e}");
                    self.shutdown();
                    return;
                }
            }
        }
    }
}

/// Persistent connection to the daemon.
///
/// Queries are serialized: the protocol has a single request in flight per connection,
/// so concurrent callers wait for each other.
pub struct Client {
    session: Mutex<Session>,
    /// Handle to the socket usable without taking the session lock.
    control: TcpStream,
    reader: Option<JoinHandle<ReaderExit>>,
    config: ClientConfig,
    peer: SocketAddr,
}

impl Client {
    pub fn connect<A: ToSocketAddrs>(address: A) -> Result<Self, ClientError> {
        Self::connect_with(address, ClientConfig::default())
    }

    /// Dial the daemon, start the reader thread and wait for the initial `Ready`.
    pub fn connect_with<A: ToSocketAddrs>(
        address: A,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let stream = dial(address, nonzero(config.connect_timeout))?;
        stream.set_write_timeout(nonzero(config.timeout))?;
        let peer = stream.peer_addr()?;

        let (tx, rx) = mpsc::sync_channel(config.queue_capacity);
        let control = stream.try_clone()?;
        let reader = reader::spawn(stream.try_clone()?, tx)?;

        let client = Client {
            session: Mutex::new(Session {
                stream,
                responses: rx,
                open: true,
            }),
            control,
            reader: Some(reader),
            config,
            peer,
        };

        // on failure the client is dropped, which closes the socket
        client.handshake()?;
        info!("connected to iqdb at {peer}");

        Ok(client)
    }

    fn handshake(&self) -> Result<(), ClientError> {
        let mut session = self.lock();
        let deadline = Deadline::after(nonzero(self.config.timeout));

        match deadline.recv(&session.responses) {
            Ok(Response::Ready) => Ok(()),
            Ok(resp) => {
                warn!("handshake expected ready, got {resp:?}");
                session.shutdown();
                Err(ClientError::InvalidResponse)
            }
            Err(e) => {
                session.shutdown();
                Err(e)
            }
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the connection can still serve queries.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn query_by_filename(
        &self,
        db_id: &str,
        flags: u32,
        num_results: u32,
        filename: &str,
    ) -> Result<Vec<QueryResult>, ClientError> {
        self.query(&Query::filename(db_id, flags, num_results, filename))
    }

    pub fn query_by_data(
        &self,
        db_id: &str,
        flags: u32,
        num_results: u32,
        data: &[u8],
    ) -> Result<Vec<QueryResult>, ClientError> {
        self.query(&Query::data(db_id, flags, num_results, data))
    }

    /// Send `query` and collect its results up to the terminating `Ready`.
    pub fn query(&self, query: &Query<'_>) -> Result<Vec<QueryResult>, ClientError> {
        query.validate()?;

        let mut session = self.lock();
        if !session.open {
            return Err(ClientError::Closed);
        }

        debug!(
            "query db={} flags={} results={} target={:?}",
            query.db_id, query.flags, query.num_results, query.target
        );
        if let Err(e) = query.write_to(&mut session.stream) {
            session.shutdown();
            return Err(e.into());
        }

        session.collect(Deadline::after(nonzero(self.config.timeout)))
    }

    /// Shut the socket down from any thread, even while a query is in flight.
    ///
    /// The reader thread stops, so a waiting query fails with
    /// [`ClientError::Disconnected`] and later ones fail as well.
    pub fn shutdown(&self) {
        info!("shutting down connection to {}", self.peer);
        let _ = self.control.shutdown(Shutdown::Both);
    }

    /// Close the connection and wait for the reader thread to finish.
    pub fn close(mut self) {
        self.teardown();
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn teardown(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };

        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        session.open = false;
        let _ = session.stream.shutdown(Shutdown::Both);

        // unblock the reader if it is waiting on a full queue
        while session.responses.recv().is_ok() {}

        if let Ok(exit) = reader.join() {
            debug!("reader for {} finished: {exit}", self.peer);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Run one filename query over a fresh connection.
pub fn query_by_filename<A: ToSocketAddrs>(
    address: A,
    db_id: &str,
    flags: u32,
    num_results: u32,
    filename: &str,
) -> Result<Vec<QueryResult>, ClientError> {
    query_once(
        address,
        ClientConfig::default(),
        &Query::filename(db_id, flags, num_results, filename),
    )
}

/// Run one inline-data query over a fresh connection.
pub fn query_by_data<A: ToSocketAddrs>(
    address: A,
    db_id: &str,
    flags: u32,
    num_results: u32,
    data: &[u8],
) -> Result<Vec<QueryResult>, ClientError> {
    query_once(
        address,
        ClientConfig::default(),
        &Query::data(db_id, flags, num_results, data),
    )
}

/// Connect, run `query` and close the connection again.
pub fn query_once<A: ToSocketAddrs>(
    address: A,
    config: ClientConfig,
    query: &Query<'_>,
) -> Result<Vec<QueryResult>, ClientError> {
    let client = Client::connect_with(address, config)?;
    let res = client.query(query);
    client.close();
    res
}

fn nonzero(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|t| !t.is_zero())
}

fn dial<A: ToSocketAddrs>(address: A, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect(address);
    };

    let mut last_err = None;
    for addr in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "address did not resolve to anything",
        )
    }))
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, BufReader, Read, Write},
        net::TcpListener,
        sync::Arc,
        thread,
    };

    use super::*;

    /// Daemon side of one accepted connection.
    struct Peer {
        reader: BufReader<TcpStream>,
        writer: TcpStream,
    }

    impl Peer {
        fn send(&mut self, lines: &str) {
            self.writer.write_all(lines.as_bytes()).unwrap();
        }

        /// Read one request line and its payload, if any.
        fn request(&mut self) -> (String, Vec<u8>) {
            let mut line = String::new();
            self.reader.read_line(&mut line).unwrap();
            let line = line.trim_end().to_string();

            let mut payload = Vec::new();
            if let Some(len) = line.rsplit(' ').next().and_then(|t| t.strip_prefix(':')) {
                payload.resize(len.parse().unwrap(), 0);
                self.reader.read_exact(&mut payload).unwrap();
            }
            (line, payload)
        }

        /// Block until the client closes its side.
        fn wait_closed(&mut self) -> bool {
            let mut rest = Vec::new();
            matches!(self.reader.read_to_end(&mut rest), Ok(_))
        }
    }

    fn mock_daemon<T, F>(script: F) -> (SocketAddr, JoinHandle<T>)
    where
        T: Send + 'static,
        F: FnOnce(Peer) -> T + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let peer = Peer {
                reader: BufReader::new(stream.try_clone().unwrap()),
                writer: stream,
            };
            script(peer)
        });
        (addr, handle)
    }

    fn config(timeout_ms: u64) -> ClientConfig {
        ClientConfig {
            timeout: Some(Duration::from_millis(timeout_ms)),
            ..ClientConfig::default()
        }
    }

    fn aggregate(responses: Vec<Response>) -> Result<Vec<QueryResult>, ClientError> {
        let mut state = State::Collecting(Vec::new());
        for resp in responses {
            state = state.apply(resp);
        }
        match state {
            State::Collecting(_) => Err(ClientError::Disconnected),
            State::Done(results) => Ok(results),
            State::Failed(e) => Err(e),
        }
    }

    fn result(img_id: u64, score: f64) -> Response {
        Response::QueryResult {
            img_id,
            score,
            width: 10,
            height: 20,
        }
    }

    #[test]
    fn aggregate_collects_until_ready() {
        let results = aggregate(vec![
            result(1, 90.0),
            Response::Info {
                text: "working".to_string(),
            },
            result(2, 80.0),
            Response::Ready,
            result(3, 70.0),
        ])
        .unwrap();

        let ids = results.iter().map(|r| r.img_id).collect::<Vec<u64>>();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn aggregate_empty_result_set() {
        assert!(aggregate(vec![Response::Ready]).unwrap().is_empty());
    }

    #[test]
    fn aggregate_reports_daemon_errors() {
        let disk_full = || Response::Error {
            text: "disk full".to_string(),
        };

        for responses in [vec![disk_full(), Response::Ready], vec![disk_full()]] {
            let err = aggregate(responses).unwrap_err();
            assert!(err.to_string().contains("error: disk full"));
        }
    }

    #[test]
    fn aggregate_reports_exceptions_and_fatals() {
        let err = aggregate(vec![
            Response::Exception {
                name: "Bad".to_string(),
                text: "thing".to_string(),
            },
            Response::Ready,
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "exception Bad: thing");

        let err = aggregate(vec![Response::Fatal {
            name: "Oom".to_string(),
            text: "out of memory".to_string(),
        }])
        .unwrap_err();
        assert_eq!(err.to_string(), "fatal Oom: out of memory");
    }

    #[test]
    fn aggregate_rejects_out_of_place_responses() {
        let err = aggregate(vec![
            Response::DbEntry {
                db_id: "0".to_string(),
                db_file: "iqdb.db".to_string(),
            },
            Response::Ready,
        ])
        .unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse));
    }

    #[test]
    fn aggregate_projects_multi_query_results() {
        let results = aggregate(vec![
            Response::MultiQueryResult {
                db_id: "7".to_string(),
                img_id: 42,
                score: 66.5,
                width: 1,
                height: 2,
            },
            Response::Ready,
        ])
        .unwrap();

        assert_eq!(
            results,
            vec![QueryResult {
                img_id: 42,
                score: 66.5,
                width: 1,
                height: 2
            }]
        );
    }

    #[test]
    fn query_by_data_round_trip() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            let req = peer.request();
            peer.send(
                "100 searching\n\
                 200 11 95.5 640 480\n\
                 201 1 12 80.25 100 50\n\
                 000 iqdb ready\n",
            );
            peer.wait_closed();
            req
        });

        let payload = b"\xff\xd8 fake jpeg\n bytes".to_vec();
        let client = Client::connect_with(addr, config(5000)).unwrap();
        let results = client.query_by_data("0", 0, 10, &payload).unwrap();
        client.close();

        assert_eq!(
            results,
            vec![
                QueryResult {
                    img_id: 11,
                    score: 95.5,
                    width: 640,
                    height: 480
                },
                QueryResult {
                    img_id: 12,
                    score: 80.25,
                    width: 100,
                    height: 50
                },
            ]
        );

        let (line, received) = daemon.join().unwrap();
        assert_eq!(line, format!("query 0 0 10 :{}", payload.len()));
        assert_eq!(received, payload);
    }

    #[test]
    fn one_shot_query_by_filename() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            let (line, _) = peer.request();
            peer.send("200 5 99.0 1 1\n000 iqdb ready\n");
            (line, peer.wait_closed())
        });

        let results = query_by_filename(addr, "0", 2, 3, "/srv/cat.jpg").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].img_id, 5);

        let (line, closed) = daemon.join().unwrap();
        assert_eq!(line, "query 0 2 3 /srv/cat.jpg");
        assert!(closed);
    }

    #[test]
    fn handshake_rejects_anything_but_ready() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("300 still loading\n");
            peer.wait_closed()
        });

        let err = Client::connect_with(addr, config(5000)).err().unwrap();
        assert!(matches!(err, ClientError::InvalidResponse));
        assert!(daemon.join().unwrap());
    }

    #[test]
    fn handshake_fails_when_daemon_hangs_up() {
        let (addr, daemon) = mock_daemon(drop);

        let err = Client::connect_with(addr, config(5000)).err().unwrap();
        daemon.join().unwrap();
        assert!(matches!(err, ClientError::Disconnected));
    }

    #[test]
    fn daemon_error_keeps_connection_usable() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            peer.request();
            peer.send("300 disk full\n000 iqdb ready\n");
            peer.request();
            peer.send("200 1 50.0 1 1\n000 iqdb ready\n");
            peer.wait_closed();
        });

        let client = Client::connect_with(addr, config(5000)).unwrap();
        let err = client.query_by_filename("0", 0, 1, "a.jpg").unwrap_err();
        assert_eq!(err.to_string(), "error: disk full");

        let results = client.query_by_filename("0", 0, 1, "b.jpg").unwrap();
        assert_eq!(results.len(), 1);

        client.close();
        daemon.join().unwrap();
    }

    #[test]
    fn exception_is_reported() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            peer.request();
            peer.send("301 Bad thing\n000 iqdb ready\n");
            peer.wait_closed();
        });

        let client = Client::connect_with(addr, config(5000)).unwrap();
        let err = client.query_by_data("0", 0, 1, b"img").unwrap_err();
        assert!(err.to_string().contains("exception"));
        assert!(err.to_string().contains("Bad: thing"));
        assert!(client.is_open());

        drop(client);
        daemon.join().unwrap();
    }

    #[test]
    fn invalid_response_closes_connection() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            peer.request();
            peer.send("102 0 /data/iqdb.db\n000 iqdb ready\n");
            peer.wait_closed()
        });

        let client = Client::connect_with(addr, config(5000)).unwrap();
        let err = client.query_by_filename("0", 0, 1, "a.jpg").unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse));
        assert!(!client.is_open());

        let err = client.query_by_filename("0", 0, 1, "a.jpg").unwrap_err();
        assert!(matches!(err, ClientError::Closed));

        assert!(daemon.join().unwrap());
    }

    #[test]
    fn deadline_saturates_on_huge_timeouts() {
        assert!(Deadline::after(Some(Duration::MAX)).0.is_none());
        assert!(Deadline::after(Some(Duration::from_secs(u64::MAX))).0.is_none());
        assert!(Deadline::after(Some(Duration::from_secs(1))).0.is_some());
    }

    #[test]
    fn connect_with_huge_timeout() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            peer.request();
            peer.send("000 iqdb ready\n");
            peer.wait_closed()
        });

        let client = Client::connect_with(
            addr,
            ClientConfig {
                timeout: Some(Duration::MAX),
                ..ClientConfig::default()
            },
        )
        .unwrap();
        assert!(client.query_by_filename("0", 0, 1, "a.jpg").unwrap().is_empty());

        client.close();
        assert!(daemon.join().unwrap());
    }

    #[test]
    fn daemon_error_without_terminator_closes_connection() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            peer.request();
            peer.send("300 disk full\n");
            peer.wait_closed()
        });

        let client = Client::connect_with(addr, config(5000)).unwrap();
        let err = client.query_by_filename("0", 0, 1, "a.jpg").unwrap_err();
        assert_eq!(err.to_string(), "error: disk full");
        assert!(!client.is_open());

        assert!(daemon.join().unwrap());
    }

    #[test]
    fn stalled_daemon_times_out() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            peer.request();
            peer.wait_closed()
        });

        let client = Client::connect_with(addr, config(200)).unwrap();
        let err = client.query_by_filename("0", 0, 1, "a.jpg").unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert!(!client.is_open());

        assert!(daemon.join().unwrap());
    }

    #[test]
    fn lost_connection_wakes_waiting_query() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            peer.request();
            peer.send("200 1 50.0 1 1\n");
        });

        let client = Client::connect_with(
            addr,
            ClientConfig {
                timeout: None,
                ..ClientConfig::default()
            },
        )
        .unwrap();
        let err = client.query_by_filename("0", 0, 1, "a.jpg").unwrap_err();
        assert!(matches!(err, ClientError::Disconnected));

        daemon.join().unwrap();
    }

    #[test]
    fn shutdown_wakes_waiting_query() {
        let (requested_tx, requested_rx) = mpsc::channel();
        let (addr, daemon) = mock_daemon(move |mut peer| {
            peer.send("000 iqdb ready\n");
            peer.request();
            requested_tx.send(()).unwrap();
            peer.wait_closed()
        });

        let client = Arc::new(
            Client::connect_with(
                addr,
                ClientConfig {
                    timeout: None,
                    ..ClientConfig::default()
                },
            )
            .unwrap(),
        );
        let waiting = {
            let client = Arc::clone(&client);
            thread::spawn(move || client.query_by_filename("0", 0, 1, "a.jpg"))
        };

        requested_rx.recv().unwrap();
        client.shutdown();

        let err = waiting.join().unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Disconnected));
        assert!(!client.is_open());
        assert!(daemon.join().unwrap());
    }

    #[test]
    fn invalid_request_is_not_sent() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            let (line, _) = peer.request();
            peer.send("000 iqdb ready\n");
            peer.wait_closed();
            line
        });

        let client = Client::connect_with(addr, config(5000)).unwrap();
        let err = client
            .query_by_filename("0", 0, 1, "two words.jpg")
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));

        assert!(client.query_by_filename("0", 0, 1, "ok.jpg").unwrap().is_empty());
        client.close();
        assert_eq!(daemon.join().unwrap(), "query 0 0 1 ok.jpg");
    }

    #[test]
    fn concurrent_queries_are_serialized() {
        let (addr, daemon) = mock_daemon(|mut peer| {
            peer.send("000 iqdb ready\n");
            for _ in 0..2 {
                let (line, _) = peer.request();
                let db = line.split(' ').nth(1).unwrap().parse::<u64>().unwrap();
                for i in 0..3 {
                    peer.send(&format!("200 {} 90.0 1 1\n", db * 100 + i));
                    thread::sleep(Duration::from_millis(5));
                }
                peer.send("000 iqdb ready\n");
            }
            peer.wait_closed();
        });

        let client = Arc::new(Client::connect_with(addr, config(5000)).unwrap());
        let workers = ["1", "2"]
            .into_iter()
            .map(|db| {
                let client = Arc::clone(&client);
                thread::spawn(move || (db, client.query_by_filename(db, 0, 3, "a.jpg").unwrap()))
            })
            .collect::<Vec<_>>();

        for worker in workers {
            let (db, results) = worker.join().unwrap();
            let base = db.parse::<u64>().unwrap() * 100;
            let ids = results.iter().map(|r| r.img_id).collect::<Vec<u64>>();
            assert_eq!(ids, vec![base, base + 1, base + 2]);
        }

        drop(client);
        daemon.join().unwrap();
    }
}
