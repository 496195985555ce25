//! Blocking HTTP transport used by the catalog client and asset fetcher

use std::fmt;
use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("romm-sync/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const STREAM_CHUNK: usize = 64 * 1024;
const STREAM_BUFFERED_CHUNKS: usize = 8;

/// Basic-auth credentials for the catalog server
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A single GET request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub timeout: Duration,
    pub credentials: Option<Credentials>,
    /// When set, `timeout` bounds each wait for data instead of the whole transfer
    pub streaming: bool,
}

impl HttpRequest {
    /// Create an unauthenticated request with the given timeout
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            timeout,
            credentials: None,
            streaming: false,
        }
    }

    /// Append a query parameter
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Attach basic-auth credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Treat `timeout` as an idle limit so large bodies are never cut off
    /// while data keeps arriving
    pub fn streamed(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// URL plus encoded query, for log output
    pub fn display_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}?{}", self.url, query.join("&"))
    }
}

/// Response status plus a streaming body
pub struct HttpResponse {
    pub status: u16,
    body: Box<dyn Read + Send>,
}

impl HttpResponse {
    pub fn new(status: u16, body: Box<dyn Read + Send>) -> Self {
        Self { status, body }
    }

    /// Response backed by an in-memory body
    pub fn from_bytes(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, Box::new(io::Cursor::new(body.into())))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body into memory
    pub fn bytes(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.body.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Take the body as a reader (for streaming large payloads to disk)
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.body
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Kind of failure below the HTTP status layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

/// A request that never produced an HTTP status
#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Timeouts and connection failures are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Timeout | TransportErrorKind::Connect
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportErrorKind::Timeout => write!(f, "timed out: {}", self.message),
            TransportErrorKind::Connect => write!(f, "connection failed: {}", self.message),
            TransportErrorKind::Other => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Seam between the sync engine and the network.
///
/// Implementations perform exactly one attempt per call; retries belong to
/// [`RetryPolicy`](super::RetryPolicy).
pub trait HttpTransport: Send + Sync {
    fn get(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// Production transport backed by a pooled `reqwest` blocking client.
///
/// The client itself has no overall deadline. Plain requests get their
/// timeout as a total deadline; streamed requests are read on a worker
/// thread and fail once no data arrives within the timeout.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> crate::Result<Self> {
        let client = client_builder()
            .build()
            .map_err(|e| crate::Error::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn get_streamed(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let (tx, rx) = mpsc::sync_channel(STREAM_BUFFERED_CHUNKS);
        let client = self.client.clone();
        let owned = request.clone();
        thread::Builder::new()
            .name("romm-sync-download".to_string())
            .spawn(move || pump(&client, &owned, &tx))
            .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;

        let idle = request.timeout;
        match rx.recv_timeout(idle) {
            Ok(StreamEvent::Head(Ok(status))) => Ok(HttpResponse::new(
                status,
                Box::new(IdleReader::new(rx, idle)),
            )),
            Ok(StreamEvent::Head(Err(e))) => Err(e),
            Ok(StreamEvent::Data(_)) => Err(TransportError::new(
                TransportErrorKind::Other,
                "body arrived before response head",
            )),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::new(
                TransportErrorKind::Timeout,
                format!("no response within {:?}", idle),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::new(
                TransportErrorKind::Other,
                "download worker exited without a response",
            )),
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        if request.streaming {
            return self.get_streamed(request);
        }

        match build(&self.client, request).timeout(request.timeout).send() {
            Ok(response) => {
                let status = response.status().as_u16();
                Ok(HttpResponse::new(status, Box::new(response)))
            }
            Err(e) => Err(classify_reqwest_error(&e)),
        }
    }
}

fn client_builder() -> ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None::<Duration>)
}

fn build(client: &Client, request: &HttpRequest) -> reqwest::blocking::RequestBuilder {
    let builder = client.get(&request.url).query(&request.query);
    match request.credentials {
        Some(ref credentials) => {
            builder.basic_auth(&credentials.username, Some(&credentials.password))
        }
        None => builder,
    }
}

enum StreamEvent {
    Head(std::result::Result<u16, TransportError>),
    Data(io::Result<Vec<u8>>),
}

/// Worker side of a streamed request. Stops as soon as the reader is dropped.
fn pump(client: &Client, request: &HttpRequest, tx: &SyncSender<StreamEvent>) {
    let mut response = match build(client, request).send() {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send(StreamEvent::Head(Err(classify_reqwest_error(&e))));
            return;
        }
    };
    if tx.send(StreamEvent::Head(Ok(response.status().as_u16()))).is_err() {
        return;
    }

    loop {
        let mut chunk = vec![0; STREAM_CHUNK];
        match response.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => {
                chunk.truncate(n);
                if tx.send(StreamEvent::Data(Ok(chunk))).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                let _ = tx.send(StreamEvent::Data(Err(e)));
                return;
            }
        }
    }
}

/// Body reader that fails when the worker goes quiet for longer than `idle`
struct IdleReader {
    rx: Receiver<StreamEvent>,
    idle: Duration,
    pending: Vec<u8>,
    pos: usize,
}

impl IdleReader {
    fn new(rx: Receiver<StreamEvent>, idle: Duration) -> Self {
        Self {
            rx,
            idle,
            pending: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for IdleReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.pending.len() {
            match self.rx.recv_timeout(self.idle) {
                Ok(StreamEvent::Data(Ok(chunk))) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Ok(StreamEvent::Data(Err(e))) => return Err(e),
                Ok(StreamEvent::Head(_)) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "duplicate response head"))
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data received for {:?}", self.idle),
                    ))
                }
                // Worker finished cleanly
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };

    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(next) = source {
        message.push_str(": ");
        message.push_str(&next.to_string());
        source = next.source();
    }

    TransportError::new(kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_url() {
        let request = HttpRequest::get("http://romm.local/api/roms", Duration::from_secs(1))
            .query("platform_id", 4)
            .query("limit", 10000);
        assert_eq!(
            request.display_url(),
            "http://romm.local/api/roms?platform_id=4&limit=10000"
        );
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("admin", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_response_bytes() {
        let response = HttpResponse::from_bytes(200, b"hello".to_vec());
        assert!(response.is_success());
        assert_eq!(response.bytes().unwrap(), b"hello");
    }

    #[test]
    fn test_transient_kinds() {
        assert!(TransportError::new(TransportErrorKind::Timeout, "t").is_transient());
        assert!(TransportError::new(TransportErrorKind::Connect, "c").is_transient());
        assert!(!TransportError::new(TransportErrorKind::Other, "o").is_transient());
    }

    /// Serves `body` after the headers, pausing `gap` between single bytes
    /// for the first `dribble` bytes and then stalling for `stall`
    fn slow_server(body: &'static [u8], dribble: usize, gap: Duration, stall: Duration) -> String {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            let mut byte = [0u8; 1];
            while !seen.ends_with(b"\r\n\r\n") {
                if socket.read(&mut byte).unwrap() == 0 {
                    return;
                }
                seen.push(byte[0]);
            }

            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).unwrap();
            socket.flush().unwrap();
            for b in &body[..dribble] {
                if socket.write_all(std::slice::from_ref(b)).is_err() {
                    return;
                }
                let _ = socket.flush();
                thread::sleep(gap);
            }
            thread::sleep(stall);
            let _ = socket.write_all(&body[dribble..]);
        });
        format!("http://{}/rom.bin", addr)
    }

    fn local_transport() -> ReqwestTransport {
        ReqwestTransport {
            client: client_builder().no_proxy().build().unwrap(),
        }
    }

    #[test]
    fn test_streamed_body_outlasts_idle_timeout() {
        // ~1s of steady data against a 500ms idle limit
        let url = slow_server(b"0123456789", 10, Duration::from_millis(100), Duration::ZERO);
        let request = HttpRequest::get(url, Duration::from_millis(500)).streamed();

        let response = local_transport().get(&request).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.bytes().unwrap(), b"0123456789");
    }

    #[test]
    fn test_stalled_stream_times_out() {
        let url = slow_server(b"0123456789", 2, Duration::ZERO, Duration::from_secs(3));
        let request = HttpRequest::get(url, Duration::from_millis(300)).streamed();

        let response = local_transport().get(&request).unwrap();
        let err = response.bytes().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_idle_reader_drains_chunks_then_ends() {
        let (tx, rx) = mpsc::sync_channel(4);
        tx.send(StreamEvent::Data(Ok(b"abc".to_vec()))).unwrap();
        tx.send(StreamEvent::Data(Ok(b"de".to_vec()))).unwrap();
        drop(tx);

        let mut reader = IdleReader::new(rx, Duration::from_millis(50));
        let mut small = [0u8; 2];
        assert_eq!(reader.read(&mut small).unwrap(), 2);
        assert_eq!(&small, b"ab");

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"cde");
    }

    #[test]
    fn test_requests_are_not_streamed_by_default() {
        let request = HttpRequest::get("http://romm/api/roms", Duration::from_secs(1));
        assert!(!request.streaming);
        assert!(request.streamed().streaming);
    }
}
