//! WARC record model.

use std::{
    fmt::Display,
    io::{Read, Write},
    str::FromStr,
};

use chrono::Utc;
use uuid::Uuid;

use crate::{
    digest::{AlgorithmName, Digest, Hasher},
    error::{GeneralError, ProtocolError, ProtocolErrorKind},
    headers::{HeaderEncoding, HeaderMap},
    io::BodyReader,
};

/// Default chunk size used when streaming a record block to a writer.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// WARC record type.
///
/// Each variant carries a distinct bit so that a set of types can be
/// expressed as a single mask (see
/// [`ArchiveIteratorConfig`](crate::read::ArchiveIteratorConfig)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarcRecordType {
    Warcinfo = 2,
    Response = 4,
    Resource = 8,
    Request = 16,
    Metadata = 32,
    Revisit = 64,
    Conversion = 128,
    Continuation = 256,
    Unknown = 512,
}

impl WarcRecordType {
    /// Mask matching every record type.
    pub const ANY_TYPE: u16 = 0xFFFF;
    /// Mask matching no record type.
    pub const NO_TYPE: u16 = 0;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warcinfo => "warcinfo",
            Self::Response => "response",
            Self::Resource => "resource",
            Self::Request => "request",
            Self::Metadata => "metadata",
            Self::Revisit => "revisit",
            Self::Conversion => "conversion",
            Self::Continuation => "continuation",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a `WARC-Type` tag to its type.
    ///
    /// Matching is ASCII-case-insensitive; unrecognised tags map to
    /// [`Unknown`](Self::Unknown).
    pub fn from_tag(tag: &[u8]) -> Self {
        match tag.to_ascii_lowercase().as_slice() {
            b"warcinfo" => Self::Warcinfo,
            b"response" => Self::Response,
            b"resource" => Self::Resource,
            b"request" => Self::Request,
            b"metadata" => Self::Metadata,
            b"revisit" => Self::Revisit,
            b"conversion" => Self::Conversion,
            b"continuation" => Self::Continuation,
            _ => Self::Unknown,
        }
    }

    pub fn matches_mask(&self, mask: u16) -> bool {
        (*self as u16) & mask != 0
    }
}

impl Display for WarcRecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single WARC record.
///
/// Records come from two places: the
/// [`ArchiveIterator`](crate::read::ArchiveIterator) yields records whose
/// body is a bounded view into the archive stream, and
/// [`new()`](Self::new) creates records to be filled in and serialised with
/// [`write()`](Self::write).
///
/// A record yielded by an iterator borrows the iterator; the borrow checker
/// enforces that it is dropped before the iterator advances.
#[derive(Debug)]
pub struct WarcRecord<'a> {
    record_type: WarcRecordType,
    headers: HeaderMap,
    is_http: bool,
    http_parsed: bool,
    http_charset: Option<String>,
    http_headers: Option<HeaderMap>,
    content_length: u64,
    body: BodyReader<'a>,
}

impl WarcRecord<'static> {
    /// Creates a new empty record for the writing path.
    pub fn new() -> Self {
        Self {
            record_type: WarcRecordType::Unknown,
            headers: HeaderMap::new(HeaderEncoding::Utf8),
            is_http: false,
            http_parsed: false,
            http_charset: None,
            http_headers: None,
            content_length: 0,
            body: BodyReader::empty(),
        }
    }
}

impl Default for WarcRecord<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> WarcRecord<'a> {
    pub(crate) fn from_stream(headers: HeaderMap, content_length: u64, body: BodyReader<'a>) -> Self {
        let record_type =
            WarcRecordType::from_tag(headers.get_bytes(b"WARC-Type").unwrap_or_default());
        let is_http = detect_is_http(&headers);

        Self {
            record_type,
            headers,
            is_http,
            http_parsed: false,
            http_charset: None,
            http_headers: None,
            content_length,
            body,
        }
    }

    /// Record type (derived from the `WARC-Type` header).
    pub fn record_type(&self) -> WarcRecordType {
        self.record_type
    }

    /// Sets the record type, keeping the `WARC-Type` header in sync.
    pub fn set_record_type(&mut self, record_type: WarcRecordType) {
        self.record_type = record_type;
        self.headers
            .set_bytes(b"WARC-Type", record_type.as_str().as_bytes());
    }

    /// Record ID (same as the `WARC-Record-ID` header).
    pub fn record_id(&self) -> Option<String> {
        self.headers.get("WARC-Record-ID")
    }

    /// WARC record headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// WARC record headers (mutable).
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Whether the record block carries an HTTP message
    /// (`Content-Type` begins with `application/http`).
    pub fn is_http(&self) -> bool {
        self.is_http
    }

    /// Marks the record as carrying an HTTP message.
    ///
    /// Also rewrites the `Content-Type` header to the matching
    /// `application/http` media type.
    pub fn set_is_http(&mut self, is_http: bool) {
        self.is_http = is_http;
        if is_http {
            let content_type: &[u8] = match self.record_type {
                WarcRecordType::Request => b"application/http; msgtype=request",
                WarcRecordType::Response => b"application/http; msgtype=response",
                _ => b"application/http",
            };
            self.headers.set_bytes(b"Content-Type", content_type);
        }
    }

    /// Whether HTTP headers have been parsed off the body.
    pub fn is_http_parsed(&self) -> bool {
        self.http_parsed
    }

    /// HTTP headers, once [`parse_http()`](Self::parse_http) has run.
    pub fn http_headers(&self) -> Option<&HeaderMap> {
        self.http_headers.as_ref()
    }

    /// Plain HTTP Content-Type without parameters such as `charset=`.
    pub fn http_content_type(&self) -> Option<String> {
        if !self.http_parsed {
            return None;
        }
        self.http_headers
            .as_ref()?
            .get("Content-Type")?
            .split(';')
            .next()
            .map(|s| s.trim().to_string())
    }

    /// HTTP charset as sent by the server, lowercased.
    pub fn http_charset(&self) -> Option<&str> {
        self.http_charset.as_deref()
    }

    /// Declared record block length in bytes.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// The record's payload reader.
    pub fn body(&self) -> &BodyReader<'a> {
        &self.body
    }

    /// The record's payload reader (mutable).
    pub fn body_mut(&mut self) -> &mut BodyReader<'a> {
        &mut self.body
    }

    /// Initialises the mandatory header set of a fresh record.
    ///
    /// Fills `WARC-Type`, `WARC-Record-ID`, `WARC-Date`, and
    /// `Content-Length`. When `record_urn` is unset, a random v4 UUID URN
    /// is generated.
    pub fn init_headers(
        &mut self,
        content_length: u64,
        record_type: Option<WarcRecordType>,
        record_urn: Option<&str>,
    ) {
        self.record_type = record_type.unwrap_or(WarcRecordType::Unknown);

        self.headers.clear();
        self.headers.set_status_line(b"WARC/1.1");
        self.headers.append("WARC-Type", self.record_type.as_str());

        let record_id = match record_urn {
            Some(urn) => format!("<{}>", urn),
            None => format!("<{}>", Uuid::new_v4().urn()),
        };
        self.headers.append("WARC-Record-ID", record_id);

        let date = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        self.headers.append("WARC-Date", date);

        self.headers
            .append("Content-Length", content_length.to_string());
        self.content_length = content_length;
    }

    /// Attaches an in-memory payload and updates `Content-Length`.
    pub fn set_bytes_content(&mut self, content: Vec<u8>) {
        self.content_length = content.len() as u64;
        self.headers
            .set("Content-Length", self.content_length.to_string());
        self.body = BodyReader::from_bytes(content);
    }

    /// Parses HTTP headers off the front of the record body.
    ///
    /// Consumes the HTTP start line and header block, leaving the body
    /// positioned at the HTTP entity body. Calling this again is a no-op;
    /// calling it on a non-HTTP record is an error and does not touch the
    /// body.
    pub fn parse_http(&mut self) -> Result<(), GeneralError> {
        if self.http_parsed {
            return Ok(());
        }
        if !self.is_http {
            return Err(ProtocolError::new(ProtocolErrorKind::NotHttpRecord).into());
        }

        let mut http_headers = HeaderMap::new(HeaderEncoding::Latin1);
        let mut line = Vec::new();
        let mut first_line = true;

        loop {
            let read_len = self.body.read_line_bytes(&mut line)?;
            if read_len == 0 {
                break;
            }

            let trimmed = crate::parse::trim_line_ending(&line);
            if trimmed.is_empty() {
                break;
            }

            if first_line {
                http_headers.set_status_line(trimmed);
                first_line = false;
                continue;
            }

            if crate::parse::is_continuation_line(trimmed) {
                http_headers.add_continuation(trimmed);
                continue;
            }

            match crate::parse::split_field_line(trimmed) {
                Ok(pair) => http_headers.append_bytes(pair.name, pair.value),
                // junk lines in server-produced headers are preserved
                // rather than rejected
                Err(_) => http_headers.add_continuation(trimmed),
            }
        }

        self.http_charset = parse_charset(&http_headers);
        self.http_headers = Some(http_headers);
        self.http_parsed = true;

        Ok(())
    }

    /// Serialises the record with [`DEFAULT_CHUNK_SIZE`].
    ///
    /// See [`write_chunked()`](Self::write_chunked).
    pub fn write<W: Write>(
        &mut self,
        out: &mut W,
        checksum_data: bool,
    ) -> Result<u64, GeneralError> {
        self.write_chunked(out, checksum_data, DEFAULT_CHUNK_SIZE)
    }

    /// Serialises the full record: headers, blank line, block, and the
    /// record terminator, streaming the payload in `chunk_size` blocks.
    ///
    /// The headers are written from the header map, so tags outside the
    /// [`WarcRecordType`] enumeration survive a round trip verbatim.
    /// `Content-Length` is recomputed from the unread payload. When
    /// `checksum_data` is set, a `WARC-Block-Digest` header (and, if the
    /// HTTP headers were parsed, a `WARC-Payload-Digest` header) is
    /// computed and inserted before the headers go out; computing a digest
    /// ahead of the block forces a streamed payload to be buffered in
    /// memory.
    ///
    /// Returns the total number of bytes written.
    pub fn write_chunked<W: Write>(
        &mut self,
        out: &mut W,
        checksum_data: bool,
        chunk_size: usize,
    ) -> Result<u64, GeneralError> {
        if !self.body.has_content() {
            return Err(ProtocolError::new(ProtocolErrorKind::MissingContent).into());
        }

        let chunk_size = chunk_size.max(1);

        // HTTP headers that were parsed off the body are re-serialised as
        // part of the block.
        let http_block = if self.http_parsed {
            let mut buf = Vec::new();
            if let Some(http_headers) = &self.http_headers {
                http_headers.write(&mut buf)?;
            }
            buf.extend_from_slice(b"\r\n");
            Some(buf)
        } else {
            None
        };

        let block_length =
            http_block.as_ref().map_or(0, |b| b.len() as u64) + self.body.remaining();

        if checksum_data {
            let mut payload = Vec::new();
            self.body.read_to_end(&mut payload)?;

            let mut hasher = Hasher::new(AlgorithmName::Sha1);
            if let Some(http_block) = &http_block {
                hasher.update(http_block);
            }
            hasher.update(&payload);
            self.headers
                .set("WARC-Block-Digest", hasher.finish_digest().to_string());

            if http_block.is_some() {
                let mut hasher = Hasher::new(AlgorithmName::Sha1);
                hasher.update(&payload);
                self.headers
                    .set("WARC-Payload-Digest", hasher.finish_digest().to_string());
            }

            self.body = BodyReader::from_bytes(payload);
        }

        self.content_length = block_length;
        self.headers.set("Content-Length", block_length.to_string());

        self.validate_headers()?;

        let mut total = self.headers.write(out)? as u64;
        out.write_all(b"\r\n")?;
        total += 2;

        if let Some(http_block) = &http_block {
            out.write_all(http_block)?;
            total += http_block.len() as u64;
        }

        let mut buf = vec![0u8; chunk_size];
        loop {
            let read_len = self.body.read(&mut buf)?;
            if read_len == 0 {
                break;
            }
            out.write_all(&buf[..read_len])?;
            total += read_len as u64;
        }

        out.write_all(b"\r\n\r\n")?;
        total += 4;

        Ok(total)
    }

    fn validate_headers(&self) -> Result<(), ProtocolError> {
        for (name, value) in self.headers.iter() {
            crate::parse::validate_field_name(name)?;
            crate::parse::validate_field_value(value)?;
        }

        Ok(())
    }

    /// Verifies the `WARC-Block-Digest` header against the unread body.
    ///
    /// Returns `false` when the header is absent, names an unsupported
    /// algorithm, or does not match. The digest covers the whole block, so
    /// call this before consuming the body. The body is drained.
    pub fn verify_block_digest(&mut self) -> Result<bool, GeneralError> {
        let expected = match self.parse_digest_header(b"WARC-Block-Digest") {
            Some(digest) => digest,
            None => return Ok(false),
        };

        let actual = self.digest_remaining(expected.algorithm())?;

        Ok(actual == expected)
    }

    /// Verifies the `WARC-Payload-Digest` header against the HTTP entity
    /// body.
    ///
    /// Parses the HTTP headers first if necessary. Returns `false` for
    /// non-HTTP records and under the same conditions as
    /// [`verify_block_digest()`](Self::verify_block_digest). The body is
    /// drained.
    pub fn verify_payload_digest(&mut self) -> Result<bool, GeneralError> {
        if !self.is_http {
            return Ok(false);
        }
        if !self.http_parsed {
            self.parse_http()?;
        }

        let expected = match self.parse_digest_header(b"WARC-Payload-Digest") {
            Some(digest) => digest,
            None => return Ok(false),
        };

        let actual = self.digest_remaining(expected.algorithm())?;

        Ok(actual == expected)
    }

    fn parse_digest_header(&self, name: &[u8]) -> Option<Digest> {
        let value = self.headers.get_bytes(name)?;
        let value = String::from_utf8_lossy(value);

        match Digest::from_str(&value) {
            Ok(digest) => Some(digest),
            Err(error) => {
                tracing::debug!(%error, "undecodable digest header");
                None
            }
        }
    }

    fn digest_remaining(&mut self, algorithm: AlgorithmName) -> Result<Digest, GeneralError> {
        let mut hasher = Hasher::new(algorithm);
        let mut buf = [0u8; 4096];

        loop {
            let read_len = self.body.read(&mut buf)?;
            if read_len == 0 {
                break;
            }
            hasher.update(&buf[..read_len]);
        }

        Ok(hasher.finish_digest())
    }
}

impl Read for WarcRecord<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.body.read(buf)
    }
}

fn detect_is_http(headers: &HeaderMap) -> bool {
    headers.get_bytes(b"Content-Type").is_some_and(|value| {
        value.len() >= 16 && value[..16].eq_ignore_ascii_case(b"application/http")
    })
}

fn parse_charset(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get("Content-Type")?.to_ascii_lowercase();
    let start = content_type.find("charset=")? + "charset=".len();
    let charset = content_type[start..]
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_string();

    if charset.is_empty() {
        None
    } else {
        Some(charset)
    }
}
