//! Chunked transfer encoding support
//!
//! This module provides encoding and decoding for HTTP chunked transfer
//! encoding. Chunk extensions and trailers are rejected rather than skipped.

use super::session::MemorySessionOps;
use super::{Error, HttpSession, Result, SessionOps, CRLF};
use std::io::Write;

/// Chunked encoder
///
/// Encodes data in HTTP chunked transfer encoding format
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    /// Create a new chunked encoder
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write a chunk of data
    ///
    /// Empty input writes nothing, since a zero-size chunk ends the body.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        // Write chunk size in hex
        write!(self.writer, "{:x}{}", data.len(), CRLF)?;

        // Write chunk data
        self.writer.write_all(data)?;

        // Write trailing CRLF
        self.writer.write_all(CRLF.as_bytes())?;

        Ok(())
    }

    /// Write the final chunk (0-sized chunk)
    pub fn finish(&mut self) -> Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consume the encoder and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Parse a chunk size line (without its CRLF)
///
/// The line must be a bare hexadecimal number.
pub fn parse_chunk_size(line: &str) -> Result<usize> {
    if line.contains(';') {
        return Err(Error::MalformedChunk(format!(
            "chunk extensions are not supported: {:?}",
            line
        )));
    }

    if line.is_empty() || !line.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::MalformedChunk(format!("invalid chunk size: {:?}", line)));
    }

    usize::from_str_radix(line, 16)
        .map_err(|_| Error::MalformedChunk(format!("chunk size out of range: {}", line)))
}

/// Read a chunked body off the session
///
/// Stops after the zero-size chunk and the empty line that must follow it,
/// so the session is positioned at the start of the next message.
pub fn read_chunked_body<S: SessionOps>(session: &mut HttpSession<S>) -> Result<Vec<u8>> {
    let mut body = Vec::new();

    loop {
        let size = parse_chunk_size(&read_line(session)?)?;
        if size == 0 {
            break;
        }

        let chunk = session.recv_exact(size)?;
        if chunk.len() < size {
            return Err(Error::MalformedChunk(format!(
                "chunk truncated: expected {} bytes, received {}",
                size,
                chunk.len()
            )));
        }
        body.extend_from_slice(&chunk);

        if session.recv_exact(2)? != CRLF.as_bytes() {
            return Err(Error::MalformedChunk("missing CRLF after chunk data".to_string()));
        }
    }

    if !read_line(session)?.is_empty() {
        return Err(Error::MalformedChunk("trailers are not supported".to_string()));
    }

    tracing::trace!(len = body.len(), "Decoded chunked body");
    Ok(body)
}

fn read_line<S: SessionOps>(session: &mut HttpSession<S>) -> Result<String> {
    let raw = session.recv_until(CRLF.as_bytes()).map_err(|e| match e {
        Error::ConnectionClosed | Error::Incomplete => {
            Error::MalformedChunk("connection closed inside chunked body".to_string())
        }
        other => other,
    })?;

    let line = &raw[..raw.len() - CRLF.len()];
    String::from_utf8(line.to_vec())
        .map_err(|_| Error::MalformedChunk("chunk size line is not text".to_string()))
}

/// Decode complete chunked body from bytes
pub fn decode_chunked_body(input: &[u8]) -> Result<Vec<u8>> {
    let mut session = HttpSession::new(MemorySessionOps::new(input));
    read_chunked_body(&mut session)
}

/// Encode data as chunked body
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let mut encoder = ChunkedEncoder::new(Vec::new());

    for chunk in data.chunks(chunk_size.max(1)) {
        encoder.write_chunk(chunk)?;
    }

    encoder.finish()?;

    Ok(encoder.into_inner())
}
