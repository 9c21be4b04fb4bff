//! HTTP server implementation
//!
//! `HttpServer` receives requests and sends responses over one session.
//! [`serve_connection`] drives the per-connection state machine on top of
//! it, and `Server` runs the accept loop with one worker thread per
//! accepted connection.

use super::docroot::DocumentRoot;
use super::session::{self, FdSessionOps};
use super::{
    mime, parser, Error, HttpRequest, HttpResponse, HttpSession, Method, Result, SessionOps,
    Status, BLOCK_SIZE,
};
use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use std::fs::{File, Metadata};
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

/// HTTP server side of one connection
///
/// Provides methods for receiving requests and sending responses.
pub struct HttpServer<S: SessionOps> {
    session: HttpSession<S>,
}

impl<S: SessionOps> HttpServer<S> {
    /// Create a new HTTP server with a session
    pub fn new(session: S) -> Self {
        HttpServer {
            session: HttpSession::new(session),
        }
    }

    /// Create a server around an already configured session
    pub fn from_session(session: HttpSession<S>) -> Self {
        HttpServer { session }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: std::time::Duration) {
        self.session.set_timeout(Some(timeout));
    }

    /// Receive request line and headers, leaving the body unread
    pub fn receive_request_head(&mut self) -> Result<HttpRequest> {
        parser::read_request_head(&mut self.session)
    }

    /// Receive the body announced by a request's `Content-Length`
    pub fn receive_body(&mut self, request: &HttpRequest) -> Result<Vec<u8>> {
        parser::read_request_body(&mut self.session, request)
    }

    /// Send an HTTP response
    pub fn send_response(&mut self, response: &HttpResponse) -> Result<()> {
        self.session.send(&response.to_wire())
    }

    /// Send response status line and headers only
    pub fn send_response_headers(&mut self, response: &HttpResponse) -> Result<()> {
        self.session.send(&response.head_to_wire())
    }

    /// Stream a file as the response body in `BLOCK_SIZE` blocks
    pub fn send_file(&mut self, path: &Path) -> Result<u64> {
        let mut file = File::open(path)?;
        let mut block = [0u8; BLOCK_SIZE];
        let mut sent = 0u64;

        loop {
            let n = file.read(&mut block)?;
            if n == 0 {
                break;
            }
            self.session.send(&block[..n])?;
            sent += n as u64;
        }

        Ok(sent)
    }

    /// Close the connection
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    /// Get a reference to the underlying session
    pub fn session(&self) -> &HttpSession<S> {
        &self.session
    }
}

/// Format a time as an RFC 1123 HTTP date
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Parse an HTTP date
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Whether a file modified at `modified` changed after `since`
///
/// HTTP dates have whole-second resolution, so sub-second parts of the
/// modification time are ignored.
pub fn modified_since(modified: SystemTime, since: DateTime<Utc>) -> bool {
    DateTime::<Utc>::from(modified).timestamp() > since.timestamp()
}

fn text_response(status: Status, message: &str) -> HttpResponse {
    HttpResponse::builder()
        .status(status)
        .header("Date", http_date(SystemTime::now()))
        .header("Content-Length", message.len().to_string())
        .header("Content-Type", "text/plain")
        .body(message.as_bytes().to_vec())
        .build()
}

/// What to send back for a dispatched request
///
/// Replies to HEAD requests go out without their body in either case.
enum Reply {
    /// A complete in-memory response
    Message(HttpResponse),
    /// Headers followed by the file's contents
    File { response: HttpResponse, path: PathBuf },
}

/// Per-connection state
enum State {
    AwaitingRequest,
    Dispatching(HttpRequest),
    Responding { reply: Reply, keep_alive: bool },
    Closed,
}

struct Connection<'a, S: SessionOps> {
    server: &'a mut HttpServer<S>,
    config: &'a ServerConfig,
    root: DocumentRoot,
    peer: &'a str,
    head_only: bool,
    response_started: bool,
}

/// Serve requests on one connection until it closes
///
/// Requests are handled one after another for as long as each asks for
/// `Connection: keep-alive`. Errors never escape: they become a `400` or
/// `500` response where one can still be sent, and the connection closes.
pub fn serve_connection<S: SessionOps>(
    server: &mut HttpServer<S>,
    config: &ServerConfig,
    peer: &str,
) {
    let mut conn = Connection {
        server,
        config,
        root: DocumentRoot::new(&config.root),
        peer,
        head_only: false,
        response_started: false,
    };

    let mut state = State::AwaitingRequest;
    loop {
        let next = match state {
            State::AwaitingRequest => conn.await_request(),
            State::Dispatching(request) => conn.dispatch(request),
            State::Responding { reply, keep_alive } => conn.respond(reply, keep_alive),
            State::Closed => break,
        };

        state = match next {
            Ok(state) => state,
            Err(e) => conn.fail(e),
        };
    }

    if let Err(e) = conn.server.close() {
        tracing::trace!(peer = conn.peer, error = %e, "Close failed");
    }
    tracing::debug!(peer = conn.peer, "Connection closed");
}

impl<S: SessionOps> Connection<'_, S> {
    fn await_request(&mut self) -> Result<State> {
        self.response_started = false;
        self.head_only = false;
        let mut request = self.server.receive_request_head()?;
        self.head_only = request.method() == Method::Head;

        tracing::info!(
            peer = self.peer,
            method = %request.method(),
            target = request.target(),
            "Request"
        );

        // The Host header must be the first header and name this server
        let host_ok = match request.headers().first() {
            Some(("Host", value)) => self.config.accepts_host(value),
            _ => false,
        };
        if !host_ok {
            tracing::warn!(peer = self.peer, "Missing or mismatched Host header");
            self.response_started = true;
            self.send(&text_response(
                Status::BAD_REQUEST,
                "Bad Request: missing or wrong Host header\n",
            ))?;
            return Ok(State::Closed);
        }

        let body = self.server.receive_body(&request)?;
        request.set_body(body);

        Ok(State::Dispatching(request))
    }

    fn dispatch(&mut self, request: HttpRequest) -> Result<State> {
        let keep_alive = request.keep_alive();
        let target = request.target();

        let reply = match request.method() {
            Method::Get | Method::Head => self.lookup(&request)?,
            Method::Put => {
                let path = self.root.put(target, request.body())?;
                tracing::debug!(path = %path.display(), bytes = request.body().len(), "Stored");
                Reply::Message(text_response(
                    Status::OK,
                    &format!("Stored {} bytes at {}\n", request.body().len(), target),
                ))
            }
            Method::Post => {
                let path = self.root.append(target, request.body())?;
                tracing::debug!(path = %path.display(), bytes = request.body().len(), "Appended");
                Reply::Message(text_response(
                    Status::OK,
                    &format!("Appended {} bytes to {}\n", request.body().len(), target),
                ))
            }
        };

        Ok(State::Responding { reply, keep_alive })
    }

    fn lookup(&self, request: &HttpRequest) -> Result<Reply> {
        let (path, meta) = match self.root.lookup(request.target())? {
            Some(found) => found,
            None => return Ok(Reply::Message(text_response(Status::NOT_FOUND, "Not Found\n"))),
        };
        let modified = meta.modified()?;

        let since = request
            .headers()
            .get_ignore_case("If-Modified-Since")
            .and_then(parse_http_date);
        if let Some(since) = since {
            if !modified_since(modified, since) {
                return Ok(Reply::Message(
                    HttpResponse::builder()
                        .status(Status::NOT_MODIFIED)
                        .header("Date", http_date(SystemTime::now()))
                        .header("Last-Modified", http_date(modified))
                        .build(),
                ));
            }
        }

        Ok(Reply::File {
            response: file_response(&path, &meta, modified),
            path,
        })
    }

    fn respond(&mut self, reply: Reply, keep_alive: bool) -> Result<State> {
        self.response_started = true;

        let status = match reply {
            Reply::Message(mut response) => {
                mark_keep_alive(&mut response, keep_alive);
                self.send(&response)?;
                response.status()
            }
            Reply::File { mut response, path } => {
                mark_keep_alive(&mut response, keep_alive);
                self.server.send_response_headers(&response)?;
                if !self.head_only {
                    self.server.send_file(&path)?;
                }
                response.status()
            }
        };

        tracing::info!(peer = self.peer, status = status.code(), keep_alive, "Response sent");

        Ok(if keep_alive {
            State::AwaitingRequest
        } else {
            State::Closed
        })
    }

    /// Send a complete response, leaving out the body for HEAD
    fn send(&mut self, response: &HttpResponse) -> Result<()> {
        if self.head_only {
            self.server.send_response_headers(response)
        } else {
            self.server.send_response(response)
        }
    }

    fn fail(&mut self, error: Error) -> State {
        // A reply is already on the wire, so nothing more can be said
        if self.response_started {
            tracing::debug!(peer = self.peer, error = %error, "Response not completed");
            return State::Closed;
        }

        let status = match &error {
            e if e.is_recoverable_close() => {
                tracing::debug!(peer = self.peer, error = %e, "Peer went away");
                return State::Closed;
            }
            Error::TruncatedBody { .. } => {
                tracing::warn!(peer = self.peer, error = %error, "Request body cut short");
                return State::Closed;
            }
            Error::MalformedMessage(_) => Status::BAD_REQUEST,
            _ => Status::INTERNAL_SERVER_ERROR,
        };

        tracing::warn!(peer = self.peer, error = %error, status = status.code(), "Request failed");

        self.response_started = true;
        let message = format!("{}\n", status);
        if let Err(e) = self.send(&text_response(status, &message)) {
            tracing::debug!(peer = self.peer, error = %e, "Could not send error response");
        }

        State::Closed
    }
}

fn mark_keep_alive(response: &mut HttpResponse, keep_alive: bool) {
    if keep_alive {
        response.headers_mut().insert("Connection", "keep-alive");
    }
}

fn file_response(path: &Path, meta: &Metadata, modified: SystemTime) -> HttpResponse {
    HttpResponse::builder()
        .status(Status::OK)
        .header("Date", http_date(SystemTime::now()))
        .header("Content-Length", meta.len().to_string())
        .header("Content-Type", mime::guess_content_type(path))
        .header("Last-Modified", http_date(modified))
        .build()
}

/// Accept loop serving a document root
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Bind the listening socket
    ///
    /// With port 0 the OS picks a port; the configuration is updated so
    /// `Host` validation expects the real one.
    pub fn bind(mut config: ServerConfig) -> Result<Server> {
        let listener = session::listen(&config.address, config.port)?;
        let addr = listener.local_addr()?;
        config.port = addr.port();

        tracing::info!(
            addr = %addr,
            root = %config.root.display(),
            "Listening for incoming connections"
        );

        Ok(Server {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections forever, one worker thread each
    ///
    /// A failed accept is logged and the loop carries on.
    pub fn run(&self) -> Result<()> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => self.spawn_worker(stream),
                Err(e) => tracing::warn!(error = %e, "Accept failed"),
            }
        }
        Ok(())
    }

    /// Run the accept loop on its own thread
    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        let handle = thread::Builder::new()
            .name("rawhttp-accept".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    fn spawn_worker(&self, stream: TcpStream) {
        let config = Arc::clone(&self.config);
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        tracing::debug!(peer = %peer, "Accepted connection");

        let spawned = thread::Builder::new()
            .name(format!("rawhttp-conn-{}", peer))
            .spawn(move || {
                let mut session: HttpSession<FdSessionOps> = session::from_tcp_stream(stream);
                session.set_timeout(Some(config.timeout));
                let mut server = HttpServer::from_session(session);
                serve_connection(&mut server, &config, &peer);
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "Could not spawn connection worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::{MemorySessionOps, PollEvents};
    use std::fs;
    use std::time::Duration;

    fn config(root: &std::path::Path) -> ServerConfig {
        ServerConfig {
            root: root.to_path_buf(),
            ..ServerConfig::default()
        }
    }

    fn serve(input: &[u8], config: &ServerConfig) -> Vec<u8> {
        let mut server = HttpServer::new(MemorySessionOps::new(input));
        serve_connection(&mut server, config, "test");
        assert!(server.session().is_closed());
        server.session().get_ref().written().to_vec()
    }

    fn responses(wire: &[u8], methods: &[Method]) -> Vec<HttpResponse> {
        let mut session = HttpSession::new(MemorySessionOps::new(wire));
        methods
            .iter()
            .map(|m| parser::read_response(&mut session, *m).unwrap())
            .collect()
    }

    #[test]
    fn test_get_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html>hi</html>").unwrap();

        let out = serve(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n", &config(dir.path()));
        let resp = &responses(&out, &[Method::Get])[0];

        assert_eq!(resp.status(), Status::OK);
        assert_eq!(resp.headers().get("Content-Type"), Some("text/html"));
        assert_eq!(resp.headers().get("Content-Length"), Some("15"));
        assert!(resp.headers().contains("Date"));
        assert_eq!(resp.body(), b"<html>hi</html>");
    }

    #[test]
    fn test_head_sends_no_body() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "abc").unwrap();

        let out = serve(b"HEAD /a.txt HTTP/1.1\r\nHost: localhost\r\n\r\n", &config(dir.path()));
        assert!(out.ends_with(b"\r\n\r\n"));

        let resp = &responses(&out, &[Method::Head])[0];
        assert_eq!(resp.headers().get("Content-Length"), Some("3"));
    }

    #[test]
    fn test_head_not_found_keeps_framing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "A").unwrap();

        let out = serve(
            b"HEAD /missing HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n\
              GET /a.txt HTTP/1.1\r\nHost: localhost\r\n\r\n",
            &config(dir.path()),
        );

        let resps = responses(&out, &[Method::Head, Method::Get]);
        assert_eq!(resps[0].status(), Status::NOT_FOUND);
        assert_eq!(resps[0].headers().get("Content-Length"), Some("10"));
        assert_eq!(resps[1].status(), Status::OK);
        assert_eq!(resps[1].body(), b"A");
    }

    #[test]
    fn test_head_status_replies_have_no_body() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page.html"), "page").unwrap();
        let cfg = config(dir.path());

        let out = serve(b"HEAD / HTTP/1.1\r\nHost: elsewhere\r\n\r\n", &cfg);
        assert!(out.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
        assert!(out.ends_with(b"\r\n\r\n"));

        let out = serve(b"HEAD /../secret HTTP/1.1\r\nHost: localhost\r\n\r\n", &cfg);
        assert!(out.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
        assert!(out.ends_with(b"\r\n\r\n"));
    }

    /// Delivers its input, then fails every write like a reset peer
    struct ResetOnWrite {
        input: MemorySessionOps,
        writes: usize,
    }

    impl SessionOps for ResetOnWrite {
        fn poll(&self, _events: PollEvents, _timeout: Option<Duration>) -> Result<bool> {
            Ok(true)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.input.read(buf)
        }

        fn write(&mut self, _buf: &[u8]) -> Result<usize> {
            self.writes += 1;
            Err(Error::Io(std::io::ErrorKind::ConnectionReset.into()))
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_reply_is_not_followed_by_another() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "x").unwrap();
        let cfg = config(dir.path());

        let inputs: [&[u8]; 2] = [
            b"GET / HTTP/1.1\r\nHost: elsewhere\r\n\r\n",
            b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
        ];
        for input in inputs {
            let mut server = HttpServer::new(ResetOnWrite {
                input: MemorySessionOps::new(input),
                writes: 0,
            });
            serve_connection(&mut server, &cfg, "test");
            assert_eq!(server.session().get_ref().writes, 1);
        }
    }

    #[test]
    fn test_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let out = serve(b"GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n", &config(dir.path()));
        assert_eq!(responses(&out, &[Method::Get])[0].status(), Status::NOT_FOUND);
    }

    #[test]
    fn test_host_must_come_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "x").unwrap();
        let cfg = config(dir.path());

        let inputs: [&[u8]; 3] = [
            b"GET / HTTP/1.1\r\n\r\n",
            b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n",
            b"GET / HTTP/1.1\r\nAccept: */*\r\nHost: localhost\r\n\r\n",
        ];
        for input in inputs {
            let out = serve(input, &cfg);
            assert_eq!(responses(&out, &[Method::Get])[0].status(), Status::BAD_REQUEST);
        }
    }

    #[test]
    fn test_bad_host_stops_processing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let out = serve(
            b"PUT /x.txt HTTP/1.1\r\nHost: evil\r\nContent-Length: 3\r\n\r\nabc",
            &cfg,
        );
        assert!(out.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
        assert!(!dir.path().join("x.txt").exists());
    }

    #[test]
    fn test_keep_alive_loop() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "A").unwrap();
        fs::write(dir.path().join("b.txt"), "B").unwrap();

        let out = serve(
            b"GET /a.txt HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n\
              GET /b.txt HTTP/1.1\r\nHost: localhost\r\n\r\n\
              GET /a.txt HTTP/1.1\r\nHost: localhost\r\n\r\n",
            &config(dir.path()),
        );

        // The second request lacks keep-alive, so the third is never served
        let resps = responses(&out, &[Method::Get, Method::Get]);
        assert_eq!(resps[0].body(), b"A");
        assert_eq!(resps[0].headers().get("Connection"), Some("keep-alive"));
        assert_eq!(resps[1].body(), b"B");

        let mut session = HttpSession::new(MemorySessionOps::new(out));
        parser::read_response(&mut session, Method::Get).unwrap();
        parser::read_response(&mut session, Method::Get).unwrap();
        assert!(matches!(
            parser::read_response(&mut session, Method::Get),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_put_then_post() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let out = serve(
            b"PUT /notes.txt HTTP/1.1\r\nHost: localhost\r\nContent-Length: 6\r\nConnection: keep-alive\r\n\r\nfirst\n\
              POST /notes.txt HTTP/1.1\r\nHost: localhost\r\nContent-Length: 7\r\n\r\nsecond\n",
            &cfg,
        );

        let resps = responses(&out, &[Method::Put, Method::Post]);
        assert!(resps.iter().all(|r| r.status() == Status::OK));
        assert_eq!(fs::read(dir.path().join("notes.txt")).unwrap(), b"first\nsecond\n");
    }

    #[test]
    fn test_unknown_method_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = serve(b"DELETE / HTTP/1.1\r\nHost: localhost\r\n\r\n", &config(dir.path()));
        assert_eq!(
            responses(&out, &[Method::Get])[0].status(),
            Status::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_malformed_request_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let out = serve(b"GET /\r\nHost: localhost\r\n\r\n", &config(dir.path()));
        assert_eq!(responses(&out, &[Method::Get])[0].status(), Status::BAD_REQUEST);
    }

    #[test]
    fn test_silent_close() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        assert!(serve(b"", &cfg).is_empty());
        assert!(serve(b"GET / HTTP/1.1\r\nHo", &cfg).is_empty());
        assert!(serve(b"PUT /x HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\n\r\nabc", &cfg).is_empty());
    }

    #[test]
    fn test_if_modified_since() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("page.html");
        fs::write(&file, "page").unwrap();
        let modified = fs::metadata(&file).unwrap().modified().unwrap();
        let cfg = config(dir.path());

        let request = |since: SystemTime| {
            format!(
                "GET /page.html HTTP/1.1\r\nHost: localhost\r\nIf-Modified-Since: {}\r\n\r\n",
                http_date(since)
            )
        };

        let out = serve(request(modified).as_bytes(), &cfg);
        let resp = &responses(&out, &[Method::Get])[0];
        assert_eq!(resp.status(), Status::NOT_MODIFIED);
        assert!(resp.body().is_empty());

        let later = modified + Duration::from_secs(3600);
        let out = serve(request(later).as_bytes(), &cfg);
        assert_eq!(responses(&out, &[Method::Get])[0].status(), Status::NOT_MODIFIED);

        let earlier = modified - Duration::from_secs(10);
        let out = serve(request(earlier).as_bytes(), &cfg);
        let resp = &responses(&out, &[Method::Get])[0];
        assert_eq!(resp.status(), Status::OK);
        assert_eq!(resp.body(), b"page");
    }

    #[test]
    fn test_http_date_round_trip() {
        let now = SystemTime::now();
        let formatted = http_date(now);
        assert!(formatted.ends_with(" GMT"));

        let parsed = parse_http_date(&formatted).unwrap();
        assert_eq!(parsed.timestamp(), DateTime::<Utc>::from(now).timestamp());
        assert!(parse_http_date("yesterday").is_none());
    }
}
