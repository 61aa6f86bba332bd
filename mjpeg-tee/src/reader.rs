//! Incremental MIME multipart reader.
//!
//! Parses the `multipart/x-mixed-replace`-shaped stream ffmpeg's mpjpeg muxer
//! writes: a delimiter line, a few headers, a blank line, then the part body.
//! Bodies are framed by `Content-Length` when present (ffmpeg always sends
//! it); without it the reader falls back to scanning for the next delimiter
//! line.

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::TeeError;

/// One decoded multipart part: its headers, in arrival order, and its body.
#[derive(Debug, Clone, Default)]
pub struct MimePart {
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MimePart {
    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")?.trim().parse().ok()
    }
}

/// Reads parts off a multipart byte stream one at a time.
pub struct MultipartReader<R> {
    reader: R,
    /// The boundary without the leading dashes.
    boundary: String,
    /// Set once the opening delimiter has been consumed.
    started: bool,
    /// Set when the closing delimiter (`--boundary--`) has been seen.
    done: bool,
}

enum Line {
    Data(Vec<u8>),
    Delimiter { last: bool },
    Eof,
}

impl<R: AsyncBufRead + Unpin> MultipartReader<R> {
    pub fn new(reader: R, boundary: &str) -> Self {
        Self {
            reader,
            boundary: boundary.to_string(),
            started: false,
            done: false,
        }
    }

    /// Returns the next part, or `None` once the stream ends, either via the
    /// closing delimiter or plain EOF between parts.
    pub async fn next_part(&mut self) -> Result<Option<MimePart>, TeeError> {
        if self.done {
            return Ok(None);
        }
        if !self.started {
            // Skip any preamble up to the first delimiter.
            loop {
                match self.read_line().await? {
                    Line::Delimiter { last } => {
                        self.started = true;
                        if last {
                            self.done = true;
                            return Ok(None);
                        }
                        break;
                    }
                    Line::Data(_) => continue,
                    Line::Eof => return Ok(None),
                }
            }
        }

        let mut part = MimePart::default();
        // Headers up to the blank separator line.
        loop {
            match self.read_line().await? {
                Line::Data(l) => {
                    let l = trim_crlf(&l);
                    if l.is_empty() {
                        break;
                    }
                    let text = String::from_utf8_lossy(l);
                    let Some((name, value)) = text.split_once(':') else {
                        return Err(TeeError::Malformed(format!("bad header line: {text:?}")));
                    };
                    part.headers
                        .push((name.trim().to_string(), value.trim().to_string()));
                }
                Line::Delimiter { .. } => {
                    return Err(TeeError::Malformed("delimiter inside headers".to_string()))
                }
                Line::Eof => {
                    // The child died mid-part; treat a clean EOF before any
                    // header as end of stream.
                    if part.headers.is_empty() {
                        return Ok(None);
                    }
                    return Err(TeeError::Malformed("EOF inside headers".to_string()));
                }
            }
        }

        match part.content_length() {
            Some(len) => {
                let mut body = vec![0u8; len];
                self.reader.read_exact(&mut body).await?;
                part.body = Bytes::from(body);
                // Consume the framing up to and including the next delimiter.
                loop {
                    match self.read_line().await? {
                        Line::Delimiter { last } => {
                            self.done = last;
                            break;
                        }
                        Line::Data(l) if trim_crlf(&l).is_empty() => continue,
                        Line::Data(l) => {
                            return Err(TeeError::Malformed(format!(
                                "trailing bytes after part body: {:?}",
                                String::from_utf8_lossy(&l)
                            )))
                        }
                        Line::Eof => {
                            self.done = true;
                            break;
                        }
                    }
                }
            }
            None => {
                // No Content-Length: accumulate raw lines until a delimiter.
                let mut body: Vec<u8> = Vec::new();
                loop {
                    match self.read_line().await? {
                        Line::Delimiter { last } => {
                            self.done = last;
                            break;
                        }
                        Line::Data(l) => body.extend_from_slice(&l),
                        Line::Eof => {
                            self.done = true;
                            break;
                        }
                    }
                }
                // The final CRLF belongs to the delimiter, not the body.
                while body.ends_with(b"\n") || body.ends_with(b"\r") {
                    body.pop();
                }
                part.body = Bytes::from(body);
            }
        }
        Ok(Some(part))
    }

    async fn read_line(&mut self) -> Result<Line, TeeError> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(Line::Eof);
        }
        let line = trim_crlf(&buf);
        if let Some(rest) = line.strip_prefix(b"--") {
            if rest == self.boundary.as_bytes() {
                return Ok(Line::Delimiter { last: false });
            }
            if let Some(b) = rest.strip_suffix(b"--") {
                if b == self.boundary.as_bytes() {
                    return Ok(Line::Delimiter { last: true });
                }
            }
        }
        Ok(Line::Data(buf))
    }
}

fn trim_crlf(l: &[u8]) -> &[u8] {
    let l = l.strip_suffix(b"\n").unwrap_or(l);
    l.strip_suffix(b"\r").unwrap_or(l)
}
