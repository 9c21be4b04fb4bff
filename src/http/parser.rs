//! HTTP message framing
//!
//! This module reads requests and responses off an `HttpSession`: the
//! header block up to the blank line, the start line and headers inside it,
//! and then the body according to its `FramingMode`.

use super::uri::split_authority;
use super::{
    chunked, Error, Headers, HttpRequest, HttpResponse, HttpSession, Method, Result, SessionOps,
    Status, Version, CRLF, HEAD_TERMINATOR,
};

/// How the length of a message body is determined
///
/// `Content-Length` wins whenever it is present; without it the body is
/// assumed to be chunked, whatever `Transfer-Encoding` says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    ContentLength(usize),
    Chunked,
}

impl FramingMode {
    /// Derive the framing mode from a header set
    pub fn of(headers: &Headers) -> Result<FramingMode> {
        match headers.get_ignore_case("Content-Length") {
            Some(value) => parse_content_length(value).map(FramingMode::ContentLength),
            None => Ok(FramingMode::Chunked),
        }
    }
}

fn parse_content_length(value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| Error::MalformedMessage(format!("invalid Content-Length: {}", value)))
}

/// Parse HTTP request line
///
/// Format: METHOD SP TARGET SP VERSION
/// Example: GET /index.html HTTP/1.1
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version)> {
    let parts: Vec<&str> = line.split(' ').collect();

    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::MalformedMessage(format!("invalid request line: {:?}", line)));
    }

    let version = parts[2].parse::<Version>()?;
    if !parts[1].starts_with('/') {
        return Err(Error::MalformedMessage(format!("invalid request target: {}", parts[1])));
    }
    let method = parts[0].parse::<Method>()?;

    Ok((method, parts[1].to_string(), version))
}

/// Parse HTTP response status line
///
/// Format: VERSION SP CODE SP REASON
/// Example: HTTP/1.1 200 OK
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() != 3 {
        return Err(Error::MalformedMessage(format!("invalid status line: {:?}", line)));
    }

    let version = parts[0].parse::<Version>()?;
    let code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::MalformedMessage(format!("invalid status code: {}", parts[1])))?;
    let status = Status::new(code)?;

    Ok((version, status, parts[2].to_string()))
}

/// Split a raw header block into its start line and headers
pub fn parse_head(block: &[u8]) -> Result<(String, Headers)> {
    let text = String::from_utf8_lossy(block);
    // Stray CRLFs before a start line are tolerated
    let text = text.trim_start_matches(CRLF);
    let text = text.strip_suffix("\r\n\r\n").unwrap_or(text);

    let mut lines = text.split(CRLF);
    let start = match lines.next() {
        Some(line) if !line.is_empty() => line.to_string(),
        _ => return Err(Error::MalformedMessage("missing start line".to_string())),
    };

    let headers = Headers::parse_block(lines)?;
    Ok((start, headers))
}

/// Read the next header block off the session
pub fn read_head<S: SessionOps>(session: &mut HttpSession<S>) -> Result<(String, Headers)> {
    let block = session.recv_until(HEAD_TERMINATOR)?;
    parse_head(&block)
}

/// Read a request's start line and headers, leaving any body unread
pub fn read_request_head<S: SessionOps>(session: &mut HttpSession<S>) -> Result<HttpRequest> {
    let (start, headers) = read_head(session)?;
    let (method, target, version) = parse_request_line(&start)?;

    let mut builder = HttpRequest::builder()
        .method(method)
        .target(target)
        .version(version);

    if let Some((host, port)) = headers.get_ignore_case("Host").and_then(split_authority) {
        builder = builder.host(host).port(port);
    }

    Ok(builder.headers(headers).build())
}

/// Read a request body
///
/// Inbound request bodies are framed by `Content-Length` only; a request
/// without it has no body.
pub fn read_request_body<S: SessionOps>(
    session: &mut HttpSession<S>,
    request: &HttpRequest,
) -> Result<Vec<u8>> {
    match request.headers().get_ignore_case("Content-Length") {
        Some(value) => read_sized_body(session, parse_content_length(value)?),
        None => Ok(Vec::new()),
    }
}

/// Read a complete request
pub fn read_request<S: SessionOps>(session: &mut HttpSession<S>) -> Result<HttpRequest> {
    let mut request = read_request_head(session)?;
    let body = read_request_body(session, &request)?;
    request.set_body(body);
    Ok(request)
}

/// Read a complete response to a request made with `method`
///
/// Responses to HEAD, and 1xx/204/304 responses, have no body.
pub fn read_response<S: SessionOps>(
    session: &mut HttpSession<S>,
    method: Method,
) -> Result<HttpResponse> {
    let (start, headers) = read_head(session)?;
    let (version, status, reason) = parse_status_line(&start)?;

    let body = if method == Method::Head || status.forbids_body() {
        Vec::new()
    } else {
        read_body(session, FramingMode::of(&headers)?)?
    };

    Ok(HttpResponse::builder()
        .version(version)
        .status(status)
        .reason(reason)
        .headers(headers)
        .body(body)
        .build())
}

/// Read a body framed by `mode`
pub fn read_body<S: SessionOps>(session: &mut HttpSession<S>, mode: FramingMode) -> Result<Vec<u8>> {
    match mode {
        FramingMode::ContentLength(len) => read_sized_body(session, len),
        FramingMode::Chunked => chunked::read_chunked_body(session),
    }
}

fn read_sized_body<S: SessionOps>(session: &mut HttpSession<S>, len: usize) -> Result<Vec<u8>> {
    let body = session.recv_exact(len)?;
    if body.len() < len {
        return Err(Error::TruncatedBody {
            expected: len,
            received: body.len(),
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::MemorySessionOps;

    fn session(data: &[u8]) -> HttpSession<MemorySessionOps> {
        HttpSession::new(MemorySessionOps::new(data))
    }

    fn trickle(data: &[u8]) -> HttpSession<MemorySessionOps> {
        HttpSession::new(MemorySessionOps::new(data).with_read_limit(1))
    }

    #[test]
    fn test_parse_request_line() {
        let (method, target, version) = parse_request_line("GET /index.html HTTP/1.1").unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(target, "/index.html");
        assert_eq!(version, Version::Http11);

        assert!(matches!(parse_request_line("GET /"), Err(Error::MalformedMessage(_))));
        assert!(matches!(
            parse_request_line("GET  /x HTTP/1.1"),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            parse_request_line("GET index.html HTTP/1.1"),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            parse_request_line("DELETE /x HTTP/1.1"),
            Err(Error::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn test_parse_status_line() {
        let (version, status, reason) = parse_status_line("HTTP/1.1 404 Not Found").unwrap();
        assert_eq!(version, Version::Http11);
        assert_eq!(status.code(), 404);
        assert_eq!(reason, "Not Found");

        assert!(matches!(parse_status_line("HTTP/1.0 404"), Err(Error::MalformedMessage(_))));
        assert!(matches!(
            parse_status_line("HTTP/1.1 abc OK"),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_framing_mode() {
        let mut headers = Headers::new();
        headers.insert("Transfer-Encoding", "gzip");
        assert_eq!(FramingMode::of(&headers).unwrap(), FramingMode::Chunked);

        headers.insert("content-length", "12");
        assert_eq!(FramingMode::of(&headers).unwrap(), FramingMode::ContentLength(12));

        headers.insert("content-length", "-1");
        assert!(FramingMode::of(&headers).is_err());
    }

    #[test]
    fn test_read_response_content_length() {
        let mut s = session(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nHello");
        let resp = read_response(&mut s, Method::Get).unwrap();

        assert_eq!(resp.status().code(), 200);
        assert_eq!(resp.reason(), "OK");
        assert_eq!(resp.headers().get("Content-Type"), Some("text/plain"));
        assert_eq!(resp.body(), b"Hello");
    }

    #[test]
    fn test_read_response_chunked() {
        let mut s = session(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n");
        let resp = read_response(&mut s, Method::Get).unwrap();
        assert_eq!(resp.body(), b"Hello World");
    }

    #[test]
    fn test_read_response_head_has_no_body() {
        let mut s = session(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
        let resp = read_response(&mut s, Method::Head).unwrap();
        assert_eq!(resp.headers().get("Content-Length"), Some("5"));
        assert!(resp.body().is_empty());

        let mut s = session(b"HTTP/1.1 304 Not Modified\r\nDate: x\r\n\r\n");
        let resp = read_response(&mut s, Method::Get).unwrap();
        assert_eq!(resp.status(), Status::NOT_MODIFIED);
        assert!(resp.body().is_empty());
    }

    #[test]
    fn test_truncated_body() {
        let mut s = session(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort");
        let err = read_response(&mut s, Method::Get).unwrap_err();
        assert!(matches!(err, Error::TruncatedBody { expected: 10, received: 5 }));
    }

    #[test]
    fn test_malformed_header_line() {
        let mut s = session(b"HTTP/1.1 200 OK\r\nBroken header\r\n\r\n");
        assert!(matches!(
            read_response(&mut s, Method::Get),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_content_length_trickle() {
        // Body delivered one byte per read, followed by unrelated bytes
        let body: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let mut wire = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        wire.extend_from_slice(&body);
        wire.extend_from_slice(b"NEXT");

        let mut s = trickle(&wire);
        let resp = read_response(&mut s, Method::Get).unwrap();
        assert_eq!(resp.body(), &body[..]);

        // Exactly the declared count was consumed
        assert_eq!(s.recv_exact(4).unwrap(), b"NEXT");
    }

    #[test]
    fn test_back_to_back_responses() {
        let mut s = session(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n\
              HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nxyz",
        );

        assert_eq!(read_response(&mut s, Method::Get).unwrap().body(), b"abc");
        assert_eq!(read_response(&mut s, Method::Get).unwrap().body(), b"xyz");
    }

    #[test]
    fn test_read_request() {
        let mut s = trickle(b"PUT /notes.txt HTTP/1.1\r\nHost: localhost:8080\r\nContent-Length: 4\r\n\r\nabcd");
        let req = read_request(&mut s).unwrap();

        assert_eq!(req.method(), Method::Put);
        assert_eq!(req.target(), "/notes.txt");
        assert_eq!(req.host(), "localhost");
        assert_eq!(req.port(), 8080);
        assert_eq!(req.body(), b"abcd");
    }

    #[test]
    fn test_request_without_length_has_no_body() {
        let mut s = session(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\nGET /x HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(read_request(&mut s).unwrap().body().is_empty());
        assert_eq!(read_request(&mut s).unwrap().target(), "/x");
    }

    #[test]
    fn test_round_trip_request() {
        let mut rng = fastrand::Rng::with_seed(7);

        for _ in 0..50 {
            let len = rng.usize(0..4096);
            let body: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
            let original = HttpRequest::builder()
                .method(Method::Post)
                .target("/upload")
                .header("Host", "localhost")
                .header("X-Trace", rng.u64(..).to_string())
                .header("Content-Length", body.len().to_string())
                .body(body)
                .build();

            let mut s = HttpSession::new(
                MemorySessionOps::new(original.to_wire()).with_read_limit(rng.usize(1..64)),
            );
            let parsed = read_request(&mut s).unwrap();

            assert_eq!(parsed.method(), original.method());
            assert_eq!(parsed.target(), original.target());
            assert_eq!(parsed.headers(), original.headers());
            assert_eq!(parsed.body(), original.body());
        }
    }

    #[test]
    fn test_round_trip_response() {
        let original = HttpResponse::builder()
            .status(Status::OK)
            .header("Content-Type", "image/png")
            .header("Date", "Tue, 15 Nov 1994 08:12:31 GMT")
            .header("Content-Length", "4")
            .body(vec![0x89, b'P', b'N', b'G'])
            .build();

        let mut s = session(&original.to_wire());
        let parsed = read_response(&mut s, Method::Get).unwrap();

        assert_eq!(parsed.status(), original.status());
        assert_eq!(parsed.headers(), original.headers());
        assert_eq!(parsed.body(), original.body());
    }
}
