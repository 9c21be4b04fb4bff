//! Embedded-image crawl for downloaded HTML documents
//!
//! Every `<img src>` in a document is planned with [`plan_fetch`], fetched
//! one at a time from a work queue, saved under `images/` next to the
//! document, and rewritten to point at the saved copy. Images on the
//! document's own host go over the connection the document arrived on.

use super::client::{connect_client, HttpClient};
use super::session::FdSessionOps;
use super::uri::scheme_of;
use super::{mime, Error, HttpRequest, HttpResponse, Method, Result, Status, Uri};
use kuchikiki::traits::TendrilSink;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Directory, next to the document, that images are saved in
pub const IMAGE_DIR: &str = "images";

/// How an image reference will be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// Same host and port as the document: reuse its connection
    SameConnection(Uri),
    /// Another plain-HTTP host: open a fresh connection
    NewConnection(Uri),
    /// Not fetchable over plain HTTP; left untouched
    Skip(String),
}

/// Decide how to fetch `reference`, found in the document at `base`
///
/// References without a scheme resolve against the document. `http`
/// references are compared with the document's origin. Secure and any
/// other schemes are skipped.
pub fn plan_fetch(reference: &str, base: &Uri) -> FetchPlan {
    let reference = reference.trim();
    if reference.is_empty() {
        return FetchPlan::Skip("empty reference".to_string());
    }

    let absolute = match scheme_of(reference) {
        None => return FetchPlan::SameConnection(base.join(reference)),
        Some(_) if reference.starts_with("//") => format!("http:{}", reference),
        Some(scheme) if scheme.eq_ignore_ascii_case("http") => reference.to_string(),
        Some(scheme) => return FetchPlan::Skip(format!("{} scheme not supported", scheme)),
    };

    match Uri::parse(&absolute) {
        Ok(uri) if uri.same_origin(base) => FetchPlan::SameConnection(uri),
        Ok(uri) => FetchPlan::NewConnection(uri),
        Err(e) => FetchPlan::Skip(e.to_string()),
    }
}

/// What happened to one image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStatus {
    /// Saved; the attribute now holds this local reference
    Saved(String),
    Skipped(String),
    Failed(String),
}

/// One `<img>` reference and its fate
#[derive(Debug, Clone)]
pub struct ImageFetch {
    pub reference: String,
    pub status: ImageStatus,
}

/// Fetches and rewrites the images of one document
pub struct Crawler {
    base: Uri,
    document_dir: PathBuf,
    timeout: Duration,
    shared: Option<HttpClient<FdSessionOps>>,
    fetched: HashMap<String, String>,
    names: HashSet<String>,
}

impl Crawler {
    /// `shared` is the still-open connection the document came over, if
    /// the server kept it alive.
    pub fn new(
        base: Uri,
        document_dir: impl Into<PathBuf>,
        timeout: Duration,
        shared: Option<HttpClient<FdSessionOps>>,
    ) -> Self {
        Crawler {
            base,
            document_dir: document_dir.into(),
            timeout,
            shared,
            fetched: HashMap::new(),
            names: HashSet::new(),
        }
    }

    /// Fetch every image in `html` and return the rewritten document
    ///
    /// A failed image is logged and left unrewritten; it never fails the
    /// document.
    pub fn rewrite_document(&mut self, html: &str) -> Result<(String, Vec<ImageFetch>)> {
        let document = kuchikiki::parse_html().one(html);

        let mut queue: VecDeque<_> = document
            .select("img")
            .map_err(|_| Error::Html("invalid selector".to_string()))?
            .filter_map(|img| {
                let src = img.attributes.borrow().get("src")?.to_string();
                Some((img, src))
            })
            .collect();

        let mut report = Vec::with_capacity(queue.len());

        while let Some((img, reference)) = queue.pop_front() {
            let status = self.process(&reference);
            if let ImageStatus::Saved(local) = &status {
                img.attributes.borrow_mut().insert("src", local.clone());
            }
            report.push(ImageFetch { reference, status });
        }

        let mut out = Vec::new();
        document.serialize(&mut out)?;

        Ok((String::from_utf8_lossy(&out).into_owned(), report))
    }

    fn process(&mut self, reference: &str) -> ImageStatus {
        if let Some(local) = self.fetched.get(reference) {
            return ImageStatus::Saved(local.clone());
        }

        let (uri, shared) = match plan_fetch(reference, &self.base) {
            FetchPlan::SameConnection(uri) => (uri, true),
            FetchPlan::NewConnection(uri) => (uri, false),
            FetchPlan::Skip(reason) => {
                tracing::debug!(reference, reason = %reason, "Skipping image");
                return ImageStatus::Skipped(reason);
            }
        };

        let result = if shared {
            self.fetch_shared(&uri)
        } else {
            self.fetch_new(&uri)
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "Image fetch failed");
                return ImageStatus::Failed(e.to_string());
            }
        };

        if response.status() != Status::OK {
            tracing::warn!(uri = %uri, status = %response.status(), "Image not available");
            return ImageStatus::Failed(format!("status {}", response.status()));
        }

        match self.save(&uri, &response) {
            Ok(local) => {
                self.fetched.insert(reference.to_string(), local.clone());
                ImageStatus::Saved(local)
            }
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "Could not save image");
                ImageStatus::Failed(e.to_string())
            }
        }
    }

    /// GET over the document's connection, reopening it once if the server
    /// dropped it between requests
    fn fetch_shared(&mut self, uri: &Uri) -> Result<HttpResponse> {
        let request = image_request(uri, true);

        if let Some(client) = self.shared.as_mut() {
            match client.exchange(&request) {
                Ok(response) => {
                    if response.closes_connection() {
                        self.shared = None;
                    }
                    return Ok(response);
                }
                Err(e) if e.is_recoverable_close() || matches!(e, Error::Io(_)) => {
                    tracing::debug!(uri = %uri, error = %e, "Shared connection unusable, reconnecting");
                    self.shared = None;
                }
                Err(e) => {
                    // Framing state is unknown after a bad response
                    self.shared = None;
                    return Err(e);
                }
            }
        }

        let mut client = connect_client(uri.host(), uri.port(), self.timeout)?;
        let response = client.exchange(&request)?;
        if !response.closes_connection() {
            self.shared = Some(client);
        }
        Ok(response)
    }

    fn fetch_new(&mut self, uri: &Uri) -> Result<HttpResponse> {
        let mut client = connect_client(uri.host(), uri.port(), self.timeout)?;
        client.exchange(&image_request(uri, false))
    }

    fn save(&mut self, uri: &Uri, response: &HttpResponse) -> Result<String> {
        let name = self.unique_name(uri, response.content_type().unwrap_or(""));
        let dir = self.document_dir.join(IMAGE_DIR);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(&name), response.body())?;

        tracing::info!(uri = %uri, file = %name, bytes = response.body().len(), "Saved image");
        Ok(format!("{}/{}", IMAGE_DIR, name))
    }

    fn unique_name(&mut self, uri: &Uri, content_type: &str) -> String {
        let path = uri.path().split(['?', '#']).next().unwrap_or("");
        let last = path.rsplit('/').next().unwrap_or("");
        let base = if last.is_empty() {
            format!("image.{}", mime::extension_for(content_type))
        } else {
            last.to_string()
        };

        let mut name = base.clone();
        let mut n = 1;
        while self.names.contains(&name) {
            name = format!("{}-{}", n, base);
            n += 1;
        }
        self.names.insert(name.clone());
        name
    }
}

fn image_request(uri: &Uri, keep_alive: bool) -> HttpRequest {
    let mut request = HttpRequest::for_parsed_uri(Method::Get, uri);
    if keep_alive {
        request.headers_mut().insert("Connection", "keep-alive");
    }
    request
}
