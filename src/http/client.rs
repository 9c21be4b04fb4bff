//! HTTP client implementation
//!
//! `HttpClient` runs request/response exchanges over one session; `Client`
//! performs a whole user-level request: connect, exchange, and then save,
//! crawl or report depending on the method and content type.

use super::crawl::{Crawler, ImageFetch};
use super::session::{self, FdSessionOps};
use super::{
    mime, parser, HttpRequest, HttpResponse, HttpSession, Method, Result, SessionOps, Uri, CRLF,
};
use crate::config::ClientConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name for a downloaded HTML document when none is configured
pub const DEFAULT_DOCUMENT_NAME: &str = "index.html";

/// HTTP client
///
/// Sends requests and receives responses, strictly one at a time, over a
/// single session.
pub struct HttpClient<S: SessionOps> {
    session: HttpSession<S>,
}

impl<S: SessionOps> HttpClient<S> {
    /// Create a new HTTP client with a session
    pub fn new(session: S) -> Self {
        HttpClient {
            session: HttpSession::new(session),
        }
    }

    /// Create a client around an already configured session
    pub fn from_session(session: HttpSession<S>) -> Self {
        HttpClient { session }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.session.set_timeout(Some(timeout));
    }

    /// Send an HTTP request
    pub fn send_request(&mut self, request: &HttpRequest) -> Result<()> {
        tracing::debug!(method = %request.method(), target = request.target(), "Sending request");
        self.session.send(&request.to_wire())
    }

    /// Receive the response to a request made with `method`
    ///
    /// Each call parses a fresh head and body, so consecutive exchanges
    /// on a kept-alive connection never see each other's state.
    pub fn receive_response(&mut self, method: Method) -> Result<HttpResponse> {
        let response = parser::read_response(&mut self.session, method)?;
        tracing::debug!(
            status = response.status().code(),
            bytes = response.body().len(),
            "Received response"
        );
        Ok(response)
    }

    /// Send a request and wait for its response
    pub fn exchange(&mut self, request: &HttpRequest) -> Result<HttpResponse> {
        self.send_request(request)?;
        self.receive_response(request.method())
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

/// Connect a client to `host:port`
pub fn connect_client(host: &str, port: u16, timeout: Duration) -> Result<HttpClient<FdSessionOps>> {
    session::connect(host, port, timeout).map(HttpClient::from_session)
}

/// Result of [`Client::perform`]
#[derive(Debug)]
pub enum Outcome {
    /// HEAD: status line and headers only
    Headers(HttpResponse),
    /// GET of an HTML document, saved with its images
    Document {
        response: HttpResponse,
        path: PathBuf,
        images: Vec<ImageFetch>,
    },
    /// GET of anything else, saved as-is
    Saved { response: HttpResponse, path: PathBuf },
    /// POST/PUT: the server's decoded reply
    Confirmation { response: HttpResponse, text: String },
}

impl Outcome {
    pub fn response(&self) -> &HttpResponse {
        match self {
            Outcome::Headers(response)
            | Outcome::Document { response, .. }
            | Outcome::Saved { response, .. }
            | Outcome::Confirmation { response, .. } => response,
        }
    }
}

/// Client request engine
pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Perform one request against the host and port it names
    ///
    /// Connection, timeout and framing errors are returned as they are.
    /// Failures while fetching the images of an HTML page are not: they are
    /// logged and reported in the outcome.
    pub fn perform(&self, request: &HttpRequest) -> Result<Outcome> {
        let mut client = connect_client(request.host(), request.port(), self.config.timeout)?;
        tracing::info!(
            method = %request.method(),
            host = request.host(),
            port = request.port(),
            target = request.target(),
            "Performing request"
        );

        match request.method() {
            Method::Head => Ok(Outcome::Headers(client.exchange(request)?)),
            Method::Get => self.get(client, request),
            Method::Post | Method::Put => {
                let response = client.exchange(&with_body(request))?;
                let charset = response.content_type().and_then(mime::charset_of);
                let text = mime::decode_text(response.body(), charset.as_deref());
                Ok(Outcome::Confirmation { response, text })
            }
        }
    }

    fn get(&self, mut client: HttpClient<FdSessionOps>, request: &HttpRequest) -> Result<Outcome> {
        let mut request = request.clone();
        request.headers_mut().insert("Connection", "keep-alive");

        let response = client.exchange(&request)?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), target = request.target(), "Server did not return OK");
        }

        let content_type = response.content_type().unwrap_or("").to_string();

        if !mime::is_html(&content_type) {
            let default_name = format!("body.{}", mime::extension_for(&content_type));
            let path = self.output_path(&default_name)?;
            fs::write(&path, response.body())?;
            tracing::info!(path = %path.display(), bytes = response.body().len(), "Saved response body");
            return Ok(Outcome::Saved { response, path });
        }

        // The raw document goes to disk first so a failed crawl still leaves it
        let path = self.output_path(DEFAULT_DOCUMENT_NAME)?;
        fs::write(&path, response.body())?;

        let charset = mime::charset_of(&content_type);
        let text = mime::decode_text(response.body(), charset.as_deref());

        let shared = if response.closes_connection() {
            None
        } else {
            Some(client)
        };
        let base = Uri::new(request.host(), request.port(), request.target());
        let document_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let mut crawler = Crawler::new(base, document_dir, self.config.timeout, shared);
        let (rewritten, images) = crawler.rewrite_document(&text)?;
        fs::write(&path, mime::encode_text(&rewritten, charset.as_deref()))?;

        tracing::info!(path = %path.display(), images = images.len(), "Saved document");
        Ok(Outcome::Document {
            response,
            path,
            images,
        })
    }

    fn output_path(&self, default_name: &str) -> Result<PathBuf> {
        let name = self
            .config
            .target
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_name));
        let path = self.config.output_dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }
}

/// Copy of a POST/PUT request with its body CRLF-terminated and framed
/// by `Content-Length`
fn with_body(request: &HttpRequest) -> HttpRequest {
    let mut body = request.body().to_vec();
    if !body.ends_with(CRLF.as_bytes()) {
        body.extend_from_slice(CRLF.as_bytes());
    }

    let mut request = request.clone();
    request
        .headers_mut()
        .insert("Content-Length", body.len().to_string());
    request.set_body(body);
    request
}
