//! Document root file access for the server
//!
//! Request targets map 1:1 onto paths under the root, with `/` (and any
//! target ending in `/`) mapping to `index.html`.

use super::{Error, Result};
use std::fs::{self, Metadata, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// File served for directory targets
pub const INDEX_FILE: &str = "index.html";

/// A directory tree requests are resolved against
#[derive(Debug, Clone)]
pub struct DocumentRoot {
    base: PathBuf,
}

impl DocumentRoot {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        DocumentRoot { base: base.into() }
    }

    /// Map a request target to a path under the root
    ///
    /// Query strings are ignored. Targets that would leave the root are
    /// rejected as malformed.
    pub fn resolve(&self, target: &str) -> Result<PathBuf> {
        let path = target.split(['?', '#']).next().unwrap_or("");
        let relative = Path::new(path.trim_start_matches('/'));

        for component in relative.components() {
            if !matches!(component, Component::Normal(_) | Component::CurDir) {
                return Err(Error::MalformedMessage(format!(
                    "target outside document root: {}",
                    target
                )));
            }
        }

        let mut resolved = self.base.join(relative);
        if path.is_empty() || path.ends_with('/') {
            resolved.push(INDEX_FILE);
        }
        Ok(resolved)
    }

    /// Find the regular file a target refers to
    pub fn lookup(&self, target: &str) -> Result<Option<(PathBuf, Metadata)>> {
        let path = self.resolve(target)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some((path, meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the file at `target` with `body`
    pub fn put(&self, target: &str, body: &[u8]) -> Result<PathBuf> {
        let path = self.writable_path(target)?;
        fs::write(&path, body)?;
        Ok(path)
    }

    /// Append `body` to the file at `target`, creating it if needed
    pub fn append(&self, target: &str, body: &[u8]) -> Result<PathBuf> {
        let path = self.writable_path(target)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(body)?;
        Ok(path)
    }

    fn writable_path(&self, target: &str) -> Result<PathBuf> {
        let path = self.resolve(target)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }
}
