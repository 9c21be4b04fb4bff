//! Session operations abstraction
//!
//! This module provides the byte stream connection used by both the client
//! and the server. A `SessionOps` implementation moves raw bytes; an
//! `HttpSession` layers timeouts and delimiter-aware buffering on top of it.
//!
//! Bytes read past a delimiter are kept in the session and served first by
//! the next read, so a header scan never swallows the start of a body.

use super::{Error, Result, BLOCK_SIZE, MAX_HEAD_SIZE};
use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Default receive/send timeout for a session
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Session operations trait
///
/// This trait defines the operations that can be performed on a transport,
/// abstracting over TCP sockets and in-memory buffers.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// HTTP session wrapping a transport with session operations
///
/// The transport is closed exactly once, either explicitly through
/// [`HttpSession::close`] or when the session is dropped.
pub struct HttpSession<S: SessionOps> {
    session: S,
    timeout: Option<Duration>,
    pending: BytesMut,
    closed: bool,
}

impl<S: SessionOps> HttpSession<S> {
    /// Create a new HTTP session
    pub fn new(session: S) -> Self {
        HttpSession {
            session,
            timeout: Some(DEFAULT_TIMEOUT),
            pending: BytesMut::with_capacity(BLOCK_SIZE),
            closed: false,
        }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of bytes received but not yet handed out
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Read data with timeout
    ///
    /// Buffered bytes left over from a previous delimited read are returned
    /// before the transport is touched.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending.split_to(n));
            return Ok(n);
        }
        self.read_transport(buf)
    }

    /// Write data with timeout
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        // Poll first
        if !self.session.poll(PollEvents::Write, self.timeout)? {
            return Err(Error::Timeout);
        }

        self.session.write(buf)
    }

    /// Write every byte of `data`
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut written = 0;

        while written < data.len() {
            let n = self.write(&data[written..])?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            written += n;
        }

        Ok(())
    }

    /// Read until `delimiter` has been seen
    ///
    /// Returns everything up to and including the delimiter. Bytes that
    /// arrived after it stay buffered for the next read. A peer that closes
    /// before sending anything yields `ConnectionClosed`; one that closes
    /// part-way yields `Incomplete`.
    pub fn recv_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>> {
        let mut scan_from = 0;

        loop {
            if let Some(pos) = find(&self.pending[scan_from..], delimiter) {
                let end = scan_from + pos + delimiter.len();
                return Ok(self.pending.split_to(end).to_vec());
            }

            if self.pending.len() > MAX_HEAD_SIZE {
                return Err(Error::MalformedMessage(format!(
                    "no delimiter within {} bytes",
                    MAX_HEAD_SIZE
                )));
            }

            // Only the tail can still hold the start of a delimiter
            scan_from = self.pending.len().saturating_sub(delimiter.len() - 1);

            if self.fill()? == 0 {
                return Err(if self.pending.is_empty() {
                    Error::ConnectionClosed
                } else {
                    Error::Incomplete
                });
            }
        }
    }

    /// Read up to `n` bytes in blocks of at most `BLOCK_SIZE`
    ///
    /// Returns fewer than `n` bytes only when the peer closed early.
    pub fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        // Capacity is capped: `n` comes straight off the wire
        let mut out = Vec::with_capacity(n.min(MAX_HEAD_SIZE));

        let take = n.min(self.pending.len());
        out.extend_from_slice(&self.pending.split_to(take));

        let mut block = [0u8; BLOCK_SIZE];
        while out.len() < n {
            let want = (n - out.len()).min(BLOCK_SIZE);
            let got = self.read_transport(&mut block[..want])?;
            if got == 0 {
                break;
            }
            out.extend_from_slice(&block[..got]);
        }

        Ok(out)
    }

    /// Close the session
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.session.close()
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Get a reference to the underlying session
    pub fn get_ref(&self) -> &S {
        &self.session
    }

    fn read_transport(&mut self, buf: &mut [u8]) -> Result<usize> {
        // Poll first
        if !self.session.poll(PollEvents::Read, self.timeout)? {
            return Err(Error::Timeout);
        }

        self.session.read(buf)
    }

    fn fill(&mut self) -> Result<usize> {
        let mut block = [0u8; BLOCK_SIZE];
        let n = self.read_transport(&mut block)?;
        self.pending.extend_from_slice(&block[..n]);
        Ok(n)
    }
}

impl<S: SessionOps> Drop for HttpSession<S> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        let mut pfd = pollfd {
            fd: self.stream.as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1); // -1 = infinite

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(Error::Io(err));
        }

        Ok(result > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            // A reset peer is a closed peer as far as framing is concerned
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(0),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(Error::ConnectionClosed),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }
}

/// In-memory session operations
///
/// Serves reads from a fixed input buffer, at most `read_limit` bytes per
/// call, and collects everything written. Useful for decoding captured
/// messages and for exercising framing with tiny read increments.
#[derive(Debug, Default)]
pub struct MemorySessionOps {
    input: Vec<u8>,
    pos: usize,
    read_limit: usize,
    output: Vec<u8>,
    closed: bool,
}

impl MemorySessionOps {
    /// Create in-memory session operations over `input`
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        MemorySessionOps {
            input: input.into(),
            pos: 0,
            read_limit: usize::MAX,
            output: Vec::new(),
            closed: false,
        }
    }

    /// Limit every read to at most `limit` bytes
    pub fn with_read_limit(mut self, limit: usize) -> Self {
        self.read_limit = limit.max(1);
        self
    }

    /// Bytes written so far
    pub fn written(&self) -> &[u8] {
        &self.output
    }

    /// Input bytes not yet read
    pub fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl SessionOps for MemorySessionOps {
    fn poll(&self, _events: PollEvents, _timeout: Option<Duration>) -> Result<bool> {
        Ok(true)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.read_limit).min(self.remaining());
        buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Helper to create an HTTP session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream) -> HttpSession<FdSessionOps> {
    HttpSession::new(FdSessionOps::new(stream))
}

/// Open a TCP connection to `host:port`
///
/// Every resolved address is tried in turn; the connect attempt itself is
/// bounded by `timeout`, which also becomes the session's I/O timeout.
pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<HttpSession<FdSessionOps>> {
    let label = format!("{}:{}", host, port);
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| Error::Connection {
            addr: label.clone(),
            source,
        })?;

    let mut last_err = None;
    for addr in addrs {
        match connect_addr(&addr, timeout) {
            Ok(stream) => {
                tracing::debug!(peer = %addr, "Connected");
                let mut session = from_tcp_stream(stream);
                session.set_timeout(Some(timeout));
                return Ok(session);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(Error::Connection {
        addr: label,
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved")),
    })
}

fn connect_addr(addr: &SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.connect_timeout(&(*addr).into(), timeout)?;
    Ok(socket.into())
}

/// Bind a listening socket on `host:port` with `SO_REUSEADDR` set
pub fn listen(host: &str, port: u16) -> Result<TcpListener> {
    let label = format!("{}:{}", host, port);
    let wrap = |source: io::Error| Error::Connection {
        addr: label.clone(),
        source,
    };

    // IPv4 first: "localhost" often resolves to ::1 before 127.0.0.1
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs().map_err(wrap)?.collect();
    let addr = addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| wrap(io::Error::new(io::ErrorKind::NotFound, "no address resolved")))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(wrap)?;
    socket.set_reuse_address(true).map_err(wrap)?;
    socket.bind(&addr.into()).map_err(wrap)?;
    socket.listen(128).map_err(wrap)?;

    Ok(socket.into())
}
