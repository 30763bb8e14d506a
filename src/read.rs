//! Archive reading.

use std::io::{BufRead, Read};

use crate::{
    error::{GeneralError, ProtocolError, ProtocolErrorKind},
    headers::{HeaderEncoding, HeaderMap},
    io::{BodyReader, LogicalPosition, TrackingReader},
    record::{WarcRecord, WarcRecordType},
};

const MAX_HEADER_LENGTH: usize = 32768;
const DRAIN_BUFFER_LENGTH: usize = 4096;

/// Configuration for an [`ArchiveIterator`].
#[derive(Debug, Clone)]
pub struct ArchiveIteratorConfig {
    /// Eagerly parse the HTTP headers of HTTP-bearing records.
    pub parse_http: bool,
    /// Bitmask of record types to yield; other records are skipped.
    pub record_type_filter: u16,
    /// Skip records whose Content-Length is less than this.
    pub min_content_length: Option<u64>,
    /// Skip records whose Content-Length is larger than this.
    pub max_content_length: Option<u64>,
}

impl Default for ArchiveIteratorConfig {
    fn default() -> Self {
        Self {
            parse_http: true,
            record_type_filter: WarcRecordType::ANY_TYPE,
            min_content_length: None,
            max_content_length: None,
        }
    }
}

/// Outcome of advancing the iterator by one record boundary.
enum Step {
    HasNext { headers: HeaderMap, length: u64 },
    SkipNext,
    Eof,
}

/// Streaming reader yielding WARC records in on-disk order.
///
/// The iterator owns a single cursor into the stream. Each yielded
/// [`WarcRecord`] borrows the iterator, and any payload the caller leaves
/// unread is drained on the next call to
/// [`next_record()`](Self::next_record).
///
/// Malformed records are skipped: the iterator resynchronises at the next
/// line beginning with a `WARC/` version marker. Only I/O failures surface
/// as errors, and they leave the iterator terminal.
pub struct ArchiveIterator<R: Read> {
    input: TrackingReader<R>,
    config: ArchiveIteratorConfig,
    /// Unread block bytes of the most recently yielded record.
    block_remaining: u64,
    /// Whether the cursor is inside a record whose block and terminator
    /// have not been passed yet.
    in_block: bool,
    /// Version line found while resynchronising, with its stream position.
    pending_version: Option<(Vec<u8>, u64)>,
    record_boundary_position: u64,
    terminal: bool,
    line_buf: Vec<u8>,
}

impl<R: Read> ArchiveIterator<R> {
    pub fn new(input: R, config: ArchiveIteratorConfig) -> Self {
        Self {
            input: TrackingReader::new(input),
            config,
            block_remaining: 0,
            in_block: false,
            pending_version: None,
            record_boundary_position: 0,
            terminal: false,
            line_buf: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &R {
        self.input.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut R {
        self.input.get_mut()
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.input.into_inner()
    }

    /// Returns the position of the beginning of the most recent WARC
    /// record.
    ///
    /// This function is intended for indexing a WARC file.
    pub fn record_boundary_position(&self) -> u64 {
        self.record_boundary_position
    }

    /// Advances to the next record passing the configured filters.
    ///
    /// Any unread payload of the previous record is drained first, so the
    /// stream is positioned at the following record boundary. Returns
    /// `None` at the end of the stream, including when the final record is
    /// truncated.
    pub fn next_record(&mut self) -> Result<Option<WarcRecord<'_>>, GeneralError> {
        if self.terminal {
            return Ok(None);
        }

        if self.in_block {
            if let Err(error) = self.finish_block() {
                self.terminal = true;
                return Err(error);
            }
            self.in_block = false;
        }

        loop {
            match self.step() {
                Ok(Step::HasNext { headers, length }) => {
                    let parse_http = self.config.parse_http;
                    self.block_remaining = length;
                    self.in_block = true;

                    let Self {
                        input,
                        block_remaining,
                        ..
                    } = self;
                    let body = BodyReader::stream(input, block_remaining);
                    let mut record = WarcRecord::from_stream(headers, length, body);

                    if parse_http && record.is_http() {
                        record.parse_http()?;
                    }

                    tracing::info!(
                        record_id = %record.record_id().unwrap_or_default(),
                        warc_type = record.record_type().as_str(),
                        content_length = length,
                        "read record"
                    );

                    return Ok(Some(record));
                }
                Ok(Step::SkipNext) => continue,
                Ok(Step::Eof) => {
                    tracing::trace!("end of archive");
                    self.terminal = true;
                    return Ok(None);
                }
                Err(error) => {
                    self.terminal = true;
                    return Err(error);
                }
            }
        }
    }

    fn step(&mut self) -> Result<Step, GeneralError> {
        // SEEK_BOUNDARY: skip blank lines until a version line; anything
        // else means the boundary was lost.
        let (version, boundary) = match self.pending_version.take() {
            Some(pending) => pending,
            None => loop {
                let read_len = self.read_line()?;
                if read_len == 0 {
                    return Ok(Step::Eof);
                }

                let line = crate::parse::trim_line_ending(&self.line_buf);
                if line.is_empty() {
                    continue;
                }

                if crate::parse::is_version_line(line) {
                    let position = self.input.logical_position() - read_len as u64;
                    break (line.to_vec(), position);
                }

                tracing::warn!(
                    position = self.input.logical_position(),
                    "lost record boundary"
                );
                return self.resync();
            },
        };

        self.record_boundary_position = boundary;

        // READ_HEADERS: capture header lines until a blank line.
        let mut headers = HeaderMap::new(HeaderEncoding::Utf8);
        headers.set_status_line(&version);
        let mut header_length = version.len();

        loop {
            let read_len = self.read_line()?;
            if read_len == 0 {
                // stream ended inside a header block; the partial record
                // is discarded
                return Ok(Step::Eof);
            }

            header_length += read_len;
            if header_length > MAX_HEADER_LENGTH {
                return self.skip_malformed(ProtocolError::new(ProtocolErrorKind::HeaderTooBig));
            }

            let line = crate::parse::trim_line_ending(&self.line_buf);

            if line.is_empty() {
                break;
            }

            if crate::parse::is_continuation_line(line) {
                headers.add_continuation(line);
                continue;
            }

            match crate::parse::split_field_line(line) {
                Ok(pair) => headers.append_bytes(pair.name, pair.value),
                Err(error) => return self.skip_malformed(error),
            }
        }

        // EMIT_RECORD: check the filters against the parsed headers.
        let length = match content_length(&headers) {
            Ok(length) => length,
            Err(error) => return self.skip_malformed(error),
        };

        let record_type =
            WarcRecordType::from_tag(headers.get_bytes(b"WARC-Type").unwrap_or_default());

        if !record_type.matches_mask(self.config.record_type_filter)
            || self
                .config
                .min_content_length
                .is_some_and(|min| length < min)
            || self
                .config
                .max_content_length
                .is_some_and(|max| length > max)
        {
            tracing::trace!(
                warc_type = record_type.as_str(),
                content_length = length,
                "record filtered"
            );
            self.block_remaining = length;
            self.finish_block()?;
            return Ok(Step::SkipNext);
        }

        Ok(Step::HasNext { headers, length })
    }

    fn skip_malformed(&mut self, error: ProtocolError) -> Result<Step, GeneralError> {
        tracing::warn!(%error, "skipping malformed record");
        self.resync()
    }

    /// Discards input up to the next line starting with a version marker.
    ///
    /// The marker line is stashed for the next step so the stream stays
    /// positioned on the record boundary.
    fn resync(&mut self) -> Result<Step, GeneralError> {
        loop {
            let read_len = self.read_line()?;
            if read_len == 0 {
                return Ok(Step::Eof);
            }

            let line = crate::parse::trim_line_ending(&self.line_buf);
            if crate::parse::is_version_line(line) {
                let position = self.input.logical_position() - read_len as u64;
                self.pending_version = Some((line.to_vec(), position));
                return Ok(Step::SkipNext);
            }
        }
    }

    /// Drains the unread block bytes and discards the record terminator.
    fn finish_block(&mut self) -> Result<(), GeneralError> {
        self.drain_block()?;
        self.consume_record_boundary()?;

        Ok(())
    }

    fn drain_block(&mut self) -> std::io::Result<()> {
        let mut buf = [0u8; DRAIN_BUFFER_LENGTH];

        while self.block_remaining > 0 {
            let upper = buf
                .len()
                .min(usize::try_from(self.block_remaining).unwrap_or(usize::MAX));
            let read_len = self.input.read(&mut buf[..upper])?;

            if read_len == 0 {
                // truncated final record
                break;
            }

            self.block_remaining -= read_len as u64;
        }

        self.block_remaining = 0;

        Ok(())
    }

    /// Discards the two line terminators that end a record.
    ///
    /// A short stream is tolerated. A non-blank line here means the
    /// terminator is missing; a version line is handed straight to the
    /// next step, anything else is discarded and the following step
    /// resynchronises.
    fn consume_record_boundary(&mut self) -> Result<(), GeneralError> {
        for _ in 0..2 {
            let read_len = self.read_line()?;
            if read_len == 0 {
                break;
            }

            let line = crate::parse::trim_line_ending(&self.line_buf);
            if !line.is_empty() {
                let position = self.input.logical_position() - read_len as u64;
                let error = ProtocolError::new(ProtocolErrorKind::InvalidRecordBoundary)
                    .with_position(position);
                tracing::warn!(%error, "record terminator missing");

                if crate::parse::is_version_line(line) {
                    self.pending_version = Some((line.to_vec(), position));
                }
                break;
            }
        }

        Ok(())
    }

    fn read_line(&mut self) -> std::io::Result<usize> {
        self.line_buf.clear();
        self.input.read_until(b'\n', &mut self.line_buf)
    }
}

impl<R: Read> LogicalPosition for ArchiveIterator<R> {
    fn logical_position(&self) -> u64 {
        self.input.logical_position()
    }
}

fn content_length(headers: &HeaderMap) -> Result<u64, ProtocolError> {
    match headers.get_bytes(b"Content-Length") {
        None => Err(ProtocolError::new(ProtocolErrorKind::NoContentLength)),
        Some(value) => {
            let text = std::str::from_utf8(value)?;

            crate::parse::parse_u64_strict(text).map_err(|error| {
                ProtocolError::new(ProtocolErrorKind::InvalidContentLength)
                    .with_snippet(text)
                    .with_source(error)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn iterate_types(data: &[u8], config: ArchiveIteratorConfig) -> Vec<WarcRecordType> {
        let mut archive = ArchiveIterator::new(Cursor::new(data.to_vec()), config);
        let mut types = Vec::new();

        while let Some(record) = archive.next_record().unwrap() {
            types.push(record.record_type());
        }

        types
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_two_records() {
        let data = b"WARC/1.1\r\n\
            WARC-Type: request\r\n\
            Content-Length: 12\r\n\
            \r\n\
            Hello world!\
            \r\n\r\n\
            WARC/1.1\r\n\
            WARC-Type: response\r\n\
            Content-Length: 0\r\n\
            \r\n\
            \r\n\r\n";

        let mut archive =
            ArchiveIterator::new(Cursor::new(data.to_vec()), ArchiveIteratorConfig::default());

        let mut record = archive.next_record().unwrap().unwrap();
        assert_eq!(record.record_type(), WarcRecordType::Request);
        assert_eq!(record.content_length(), 12);

        let mut block = Vec::new();
        record.read_to_end(&mut block).unwrap();
        assert_eq!(block, b"Hello world!");

        let record = archive.next_record().unwrap().unwrap();
        assert_eq!(record.record_type(), WarcRecordType::Response);
        assert_eq!(record.content_length(), 0);

        assert!(archive.next_record().unwrap().is_none());
        // terminal stays terminal
        assert!(archive.next_record().unwrap().is_none());

        archive.into_inner();
    }

    #[test]
    fn test_unread_payload_is_drained() {
        let data = b"WARC/1.1\r\n\
            Content-Length: 12\r\n\
            \r\n\
            Hello world!\
            \r\n\r\n\
            WARC/1.1\r\n\
            Content-Length: 3\r\n\
            \r\n\
            abc\
            \r\n\r\n";

        let mut archive =
            ArchiveIterator::new(Cursor::new(data.to_vec()), ArchiveIteratorConfig::default());

        // ignore the first record's payload entirely
        archive.next_record().unwrap().unwrap();

        let mut record = archive.next_record().unwrap().unwrap();
        let mut block = Vec::new();
        record.read_to_end(&mut block).unwrap();
        assert_eq!(block, b"abc");

        assert!(archive.next_record().unwrap().is_none());
    }

    #[test]
    fn test_record_boundary_position() {
        let data = b"WARC/1.1\r\n\
            Content-Length: 3\r\n\
            \r\n\
            abc\
            \r\n\r\n\
            WARC/1.1\r\n\
            Content-Length: 0\r\n\
            \r\n\
            \r\n\r\n";

        let mut archive =
            ArchiveIterator::new(Cursor::new(data.to_vec()), ArchiveIteratorConfig::default());

        archive.next_record().unwrap().unwrap();
        assert_eq!(archive.record_boundary_position(), 0);

        archive.next_record().unwrap().unwrap();
        // first record occupies the bytes before the second version line
        let second_start = data.windows(4).skip(4).position(|w| w == b"WARC").unwrap() + 4;
        assert_eq!(archive.record_boundary_position(), second_start as u64);
    }

    #[test]
    fn test_bare_lf_input() {
        let data = b"WARC/1.1\n\
            WARC-Type: resource\n\
            Content-Length: 2\n\
            \n\
            ok\
            \n\n\
            WARC/1.1\n\
            WARC-Type: resource\n\
            Content-Length: 0\n\
            \n\
            \n\n";

        let types = iterate_types(data, ArchiveIteratorConfig::default());
        assert_eq!(
            types,
            vec![WarcRecordType::Resource, WarcRecordType::Resource]
        );
    }

    #[test]
    fn test_continuation_line_folded() {
        let data = b"WARC/1.1\r\nX-Foo: a\r\n  b\r\nContent-Length: 0\r\n\r\n\r\n\r\n";

        let mut archive =
            ArchiveIterator::new(Cursor::new(data.to_vec()), ArchiveIteratorConfig::default());

        let record = archive.next_record().unwrap().unwrap();
        assert_eq!(record.headers().get("X-Foo").as_deref(), Some("a b"));
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_malformed_header_skips_record() {
        let data = b"WARC/1.1\r\n\
            Foo bar\r\n\
            Content-Length: 0\r\n\
            \r\n\
            \r\n\r\n";

        let types = iterate_types(data, ArchiveIteratorConfig::default());
        assert!(types.is_empty());
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_garbage_between_records() {
        let data = b"WARC/1.1\r\n\
            WARC-Type: request\r\n\
            Content-Length: 0\r\n\
            \r\n\
            \r\n\r\n\
            %%%% not a record %%%%\r\n\
            more garbage\r\n\
            WARC/1.1\r\n\
            WARC-Type: response\r\n\
            Content-Length: 0\r\n\
            \r\n\
            \r\n\r\n";

        let types = iterate_types(data, ArchiveIteratorConfig::default());
        assert_eq!(
            types,
            vec![WarcRecordType::Request, WarcRecordType::Response]
        );
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_missing_record_terminator() {
        let data = b"WARC/1.1\r\n\
            WARC-Type: resource\r\n\
            Content-Length: 3\r\n\
            \r\n\
            abc\
            WARC/1.1\r\n\
            WARC-Type: response\r\n\
            Content-Length: 0\r\n\
            \r\n\
            \r\n\r\n";

        let types = iterate_types(data, ArchiveIteratorConfig::default());
        assert_eq!(
            types,
            vec![WarcRecordType::Resource, WarcRecordType::Response]
        );
    }

    #[test]
    fn test_non_utf8_content_length_skips_record() {
        let data = b"WARC/1.1\r\n\
            WARC-Type: metadata\r\n\
            Content-Length: \xff\xfe\r\n\
            \r\n\
            WARC/1.1\r\n\
            WARC-Type: resource\r\n\
            Content-Length: 0\r\n\
            \r\n\
            \r\n\r\n";

        let types = iterate_types(data, ArchiveIteratorConfig::default());
        assert_eq!(types, vec![WarcRecordType::Resource]);
    }

    #[test]
    fn test_missing_content_length_skips_record() {
        let data = b"WARC/1.1\r\n\
            WARC-Type: metadata\r\n\
            \r\n\
            WARC/1.1\r\n\
            WARC-Type: resource\r\n\
            Content-Length: 0\r\n\
            \r\n\
            \r\n\r\n";

        let types = iterate_types(data, ArchiveIteratorConfig::default());
        assert_eq!(types, vec![WarcRecordType::Resource]);
    }

    #[test]
    fn test_record_type_filter() {
        let data = b"WARC/1.1\r\n\
            WARC-Type: warcinfo\r\n\
            Content-Length: 2\r\n\
            \r\n\
            {}\
            \r\n\r\n\
            WARC/1.1\r\n\
            WARC-Type: request\r\n\
            Content-Length: 0\r\n\
            \r\n\
            \r\n\r\n\
            WARC/1.1\r\n\
            WARC-Type: response\r\n\
            Content-Length: 0\r\n\
            \r\n\
            \r\n\r\n";

        let config = ArchiveIteratorConfig {
            record_type_filter: WarcRecordType::Response as u16 | WarcRecordType::Request as u16,
            ..Default::default()
        };

        let types = iterate_types(data, config);
        assert_eq!(
            types,
            vec![WarcRecordType::Request, WarcRecordType::Response]
        );
    }

    #[test]
    fn test_content_length_filter() {
        let data = b"WARC/1.1\r\n\
            WARC-Type: resource\r\n\
            Content-Length: 10\r\n\
            \r\n\
            0123456789\
            \r\n\r\n\
            WARC/1.1\r\n\
            WARC-Type: resource\r\n\
            Content-Length: 2\r\n\
            \r\n\
            ok\
            \r\n\r\n";

        let config = ArchiveIteratorConfig {
            max_content_length: Some(5),
            ..Default::default()
        };

        let mut archive = ArchiveIterator::new(Cursor::new(data.to_vec()), config);
        let record = archive.next_record().unwrap().unwrap();
        assert_eq!(record.content_length(), 2);
        assert!(archive.next_record().unwrap().is_none());
    }

    #[test]
    fn test_truncated_final_record() {
        let data = b"WARC/1.1\r\n\
            WARC-Type: resource\r\n\
            Content-Length: 4\r\n\
            \r\n\
            full\
            \r\n\r\n\
            WARC/1.1\r\n\
            WARC-Type: resource\r\n\
            Content-Length: 100\r\n\
            \r\n\
            cut short";

        let mut archive =
            ArchiveIterator::new(Cursor::new(data.to_vec()), ArchiveIteratorConfig::default());

        let mut record = archive.next_record().unwrap().unwrap();
        let mut block = Vec::new();
        record.read_to_end(&mut block).unwrap();
        assert_eq!(block, b"full");

        let mut record = archive.next_record().unwrap().unwrap();
        let mut block = Vec::new();
        record.read_to_end(&mut block).unwrap();
        assert_eq!(block, b"cut short");

        assert!(archive.next_record().unwrap().is_none());
    }

    #[test]
    fn test_eager_http_parsing() {
        let body = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nhi";
        let mut data = Vec::new();
        data.extend_from_slice(
            format!(
                "WARC/1.1\r\n\
                 WARC-Type: response\r\n\
                 Content-Type: application/http; msgtype=response\r\n\
                 Content-Length: {}\r\n\
                 \r\n",
                body.len()
            )
            .as_bytes(),
        );
        data.extend_from_slice(body);
        data.extend_from_slice(b"\r\n\r\n");

        let mut archive =
            ArchiveIterator::new(Cursor::new(data), ArchiveIteratorConfig::default());

        let mut record = archive.next_record().unwrap().unwrap();
        assert!(record.is_http_parsed());
        assert_eq!(
            record.http_headers().unwrap().status_line_bytes(),
            b"HTTP/1.1 200 OK"
        );

        let mut rest = Vec::new();
        record.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"hi");
    }
}
