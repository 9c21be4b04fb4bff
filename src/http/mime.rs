//! Media types and text decoding
//!
//! A small fixed table is enough here: the server labels the files it
//! serves and the client picks file names for what it downloads.

use std::path::Path;

/// Media type used when nothing better is known
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("txt", "text/plain"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
    ("webp", "image/webp"),
    ("pdf", "application/pdf"),
    ("bin", DEFAULT_CONTENT_TYPE),
];

/// Guess a content type from a file extension
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return DEFAULT_CONTENT_TYPE,
    };

    TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, t)| *t)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// The file extension conventionally used for a content type
pub fn extension_for(content_type: &str) -> &'static str {
    let essence = essence(content_type);

    TYPES
        .iter()
        .find(|(_, t)| t.eq_ignore_ascii_case(&essence))
        .map(|(e, _)| *e)
        .unwrap_or("bin")
}

/// Whether a content type denotes an HTML document
pub fn is_html(content_type: &str) -> bool {
    essence(content_type) == "text/html"
}

/// The `charset=` parameter of a content type, lowercased
pub fn charset_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_ascii_lowercase())
        } else {
            None
        }
    })
}

/// Decode a text body
///
/// UTF-8 is honoured when named; every other charset, and a missing one,
/// falls back to Latin-1.
pub fn decode_text(body: &[u8], charset: Option<&str>) -> String {
    match charset {
        Some("utf-8") | Some("utf8") => String::from_utf8_lossy(body).into_owned(),
        _ => body.iter().map(|&b| b as char).collect(),
    }
}

/// Encode text back to bytes with the charset it was decoded with
pub fn encode_text(text: &str, charset: Option<&str>) -> Vec<u8> {
    match charset {
        Some("utf-8") | Some("utf8") => text.as_bytes().to_vec(),
        _ => text
            .chars()
            .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
            .collect(),
    }
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("www/index.html")), "text/html");
        assert_eq!(guess_content_type(Path::new("image.PNG")), "image/png");
        assert_eq!(guess_content_type(Path::new("README")), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("text/plain; charset=utf-8"), "txt");
        assert_eq!(extension_for("application/x-unknown"), "bin");
    }

    #[test]
    fn test_charset() {
        assert_eq!(charset_of("text/html; charset=UTF-8"), Some("utf-8".to_string()));
        assert_eq!(charset_of("text/html;charset=\"iso-8859-1\""), Some("iso-8859-1".to_string()));
        assert_eq!(charset_of("text/html"), None);
        assert!(is_html("Text/HTML; charset=utf-8"));
        assert!(!is_html("text/plain"));
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_text("caf\u{e9}".as_bytes(), Some("utf-8")), "caf\u{e9}");
        assert_eq!(decode_text(&[b'c', b'a', b'f', 0xe9], None), "caf\u{e9}");
        assert_eq!(encode_text("caf\u{e9}", None), vec![b'c', b'a', b'f', 0xe9]);
    }
}
