//! WARC and HTTP header blocks.

use std::{cell::OnceCell, collections::HashMap, io::Write};

use encoding::{all::WINDOWS_1252, DecoderTrap, Encoding as _};

/// Source encoding used when rendering header bytes to text.
///
/// WARC headers are UTF-8; HTTP headers are decoded as Latin-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEncoding {
    Utf8,
    Latin1,
}

/// Ordered name-value list representing a WARC or HTTP header block.
///
/// Lookups are ASCII-case-insensitive and return the first match, while
/// duplicate names and insertion order are preserved for serialisation.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    encoding: HeaderEncoding,
    status_line: Vec<u8>,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    // lowercased name -> index of first occurrence, rebuilt on demand
    index: OnceCell<HashMap<Vec<u8>, usize>>,
}

impl HeaderMap {
    /// Creates a new header map with the specified encoding.
    pub fn new(encoding: HeaderEncoding) -> Self {
        Self {
            encoding,
            status_line: Vec::new(),
            entries: Vec::new(),
            index: OnceCell::new(),
        }
    }

    /// Returns the header encoding.
    pub fn encoding(&self) -> HeaderEncoding {
        self.encoding
    }

    /// Returns the status line rendered as text.
    ///
    /// For WARC headers this is the version line; for HTTP headers the
    /// request or status line.
    pub fn status_line(&self) -> String {
        self.decode(&self.status_line)
    }

    /// Returns the raw status line bytes.
    pub fn status_line_bytes(&self) -> &[u8] {
        &self.status_line
    }

    /// Replaces the status line.
    pub fn set_status_line(&mut self, status_line: impl AsRef<[u8]>) {
        self.status_line = status_line.as_ref().to_vec();
    }

    /// HTTP status code (unset if the block is not an HTTP response block).
    pub fn status_code(&self) -> Option<u16> {
        if !self.status_line.starts_with(b"HTTP/") {
            return None;
        }
        let mut parts = self.status_line.splitn(3, |&b| b == b' ');
        // Skip HTTP version
        parts.next()?;
        String::from_utf8_lossy(parts.next()?).parse::<u16>().ok()
    }

    /// HTTP reason phrase.
    ///
    /// Returns `None` if the block is not an HTTP response block or no
    /// reason phrase was given.
    pub fn reason_phrase(&self) -> Option<String> {
        if !self.status_line.starts_with(b"HTTP/") {
            return None;
        }
        let mut parts = self.status_line.splitn(3, |&b| b == b' ');
        // Skip HTTP version and status code
        parts.next()?;
        parts.next()?;
        Some(self.decode(parts.next()?))
    }

    fn decode(&self, byte_str: &[u8]) -> String {
        match self.encoding {
            HeaderEncoding::Utf8 => String::from_utf8_lossy(byte_str).to_string(),
            HeaderEncoding::Latin1 => WINDOWS_1252
                .decode(byte_str, DecoderTrap::Ignore)
                .unwrap_or_else(|_| String::new()),
        }
    }

    fn index(&self) -> &HashMap<Vec<u8>, usize> {
        self.index.get_or_init(|| {
            let mut index = HashMap::with_capacity(self.entries.len());

            for (i, (name, _value)) in self.entries.iter().enumerate() {
                index.entry(name.to_ascii_lowercase()).or_insert(i);
            }

            index
        })
    }

    fn invalidate_index(&mut self) {
        self.index.take();
    }

    /// Returns the value of the first header with a matching name, rendered
    /// as text.
    pub fn get(&self, name: &str) -> Option<String> {
        Some(self.decode(self.get_bytes(name.as_bytes())?))
    }

    /// Returns the raw value of the first header with a matching name.
    pub fn get_bytes(&self, name: &[u8]) -> Option<&[u8]> {
        let i = *self.index().get(&name.to_ascii_lowercase())?;

        Some(self.entries[i].1.as_slice())
    }

    /// Returns the raw values of every header with a matching name, in
    /// insertion order.
    pub fn get_all<'a>(&'a self, name: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.entries.iter().filter_map(move |(n, v)| {
            if n.eq_ignore_ascii_case(name) {
                Some(v.as_slice())
            } else {
                None
            }
        })
    }

    /// Returns whether a header with a matching name exists.
    pub fn contains_key(&self, name: &str) -> bool {
        self.index().contains_key(&name.as_bytes().to_ascii_lowercase())
    }

    /// Inserts a header, overwriting existing headers with the same name.
    ///
    /// The first occurrence is updated in place and any following
    /// occurrences are dropped. If no header matches, the header is
    /// appended.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) {
        self.set_bytes(name.as_ref().as_bytes(), value.as_ref().as_bytes());
    }

    /// Byte variant of [`set()`](Self::set).
    pub fn set_bytes(&mut self, name: &[u8], value: &[u8]) {
        let name_lower = name.to_ascii_lowercase();
        let mut found = false;

        self.entries.retain_mut(|entry| {
            if entry.0.to_ascii_lowercase() != name_lower {
                true
            } else if !found {
                *entry = (name.trim_ascii().to_vec(), value.trim_ascii().to_vec());
                found = true;
                true
            } else {
                false
            }
        });

        if !found {
            self.entries
                .push((name.trim_ascii().to_vec(), value.trim_ascii().to_vec()));
        }

        self.invalidate_index();
    }

    /// Appends a header without checking for existing names.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) {
        self.append_bytes(name.as_ref().as_bytes(), value.as_ref().as_bytes());
    }

    /// Byte variant of [`append()`](Self::append).
    pub fn append_bytes(&mut self, name: &[u8], value: &[u8]) {
        self.entries
            .push((name.trim_ascii().to_vec(), value.trim_ascii().to_vec()));
        self.invalidate_index();
    }

    /// Folds a continuation line into the last header.
    ///
    /// The trimmed value is joined to the previous value with a single
    /// space. A continuation with no preceding header is dropped.
    pub fn add_continuation(&mut self, value: &[u8]) {
        if let Some(last) = self.entries.last_mut() {
            last.1.push(b' ');
            last.1.extend_from_slice(value.trim_ascii());
            self.invalidate_index();
        } else {
            tracing::trace!("dropped continuation line without a header");
        }
    }

    /// Iterator of names and values rendered as text.
    pub fn items(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.entries
            .iter()
            .map(|(n, v)| (self.decode(n), self.decode(v)))
    }

    /// Iterator of header names rendered as text.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().map(|(n, _v)| self.decode(n))
    }

    /// Iterator of header values rendered as text.
    pub fn values(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().map(|(_n, v)| self.decode(v))
    }

    /// Iterator of raw name-value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.entries.iter().map(|(n, v)| (n.as_slice(), v.as_slice()))
    }

    /// Returns the number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the map has no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resets the status line and all headers.
    pub fn clear(&mut self) {
        self.status_line.clear();
        self.entries.clear();
        self.invalidate_index();
    }

    /// Writes the header block into a stream.
    ///
    /// Emits the status line followed by one `name: value` line per entry,
    /// each CRLF-terminated. The blank line ending a header block is the
    /// caller's responsibility.
    ///
    /// Returns the number of bytes written.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        let mut bytes_written = 0usize;

        if !self.status_line.is_empty() {
            writer.write_all(&self.status_line)?;
            bytes_written += self.status_line.len();
            writer.write_all(b"\r\n")?;
            bytes_written += 2;
        }

        for (name, value) in &self.entries {
            if !name.is_empty() {
                writer.write_all(name)?;
                bytes_written += name.len();
                writer.write_all(b": ")?;
                bytes_written += 2;
            }
            writer.write_all(value)?;
            bytes_written += value.len();
            writer.write_all(b"\r\n")?;
            bytes_written += 2;
        }

        Ok(bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> HeaderMap {
        HeaderMap::new(HeaderEncoding::Utf8)
    }

    #[test]
    fn test_get_set_case_insensitive() {
        let mut headers = map();
        headers.append("WARC-Type", "response");

        assert_eq!(headers.get("warc-type").as_deref(), Some("response"));
        assert_eq!(headers.get("WARC-TYPE").as_deref(), Some("response"));
        assert!(headers.contains_key("Warc-Type"));
        assert_eq!(headers.get("WARC-Date"), None);

        headers.set("warc-type", "request");
        assert_eq!(headers.get("WARC-Type").as_deref(), Some("request"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_duplicates_preserved_first_wins() {
        let mut headers = map();
        headers.append("WARC-Concurrent-To", "<urn:uuid:1>");
        headers.append("WARC-Concurrent-To", "<urn:uuid:2>");

        assert_eq!(headers.len(), 2);
        assert_eq!(
            headers.get("WARC-Concurrent-To").as_deref(),
            Some("<urn:uuid:1>")
        );
        assert_eq!(
            headers
                .get_all(b"WARC-Concurrent-To")
                .collect::<Vec<_>>(),
            vec![b"<urn:uuid:1>".as_slice(), b"<urn:uuid:2>".as_slice()]
        );
    }

    #[test]
    fn test_set_drops_later_duplicates() {
        let mut headers = map();
        headers.append("n1", "a");
        headers.append("n2", "b");
        headers.append("N1", "c");

        headers.set("n1", "z");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("n1").as_deref(), Some("z"));
        assert_eq!(
            headers.items().collect::<Vec<_>>(),
            vec![
                ("n1".to_string(), "z".to_string()),
                ("n2".to_string(), "b".to_string())
            ]
        );
    }

    #[test]
    fn test_continuation_folding() {
        let mut headers = map();
        headers.append("X-Foo", "a");
        headers.add_continuation(b"  b\t");

        assert_eq!(headers.get("X-Foo").as_deref(), Some("a b"));
    }

    #[test]
    fn test_continuation_without_header_dropped() {
        let mut headers = map();
        headers.add_continuation(b"orphan");

        assert!(headers.is_empty());
    }

    #[test]
    fn test_write() {
        let mut headers = map();
        headers.set_status_line(b"WARC/1.1");
        headers.append("WARC-Type", "warcinfo");
        headers.append("Content-Length", "0");

        let mut buf = Vec::new();
        let count = headers.write(&mut buf).unwrap();

        assert_eq!(
            buf,
            b"WARC/1.1\r\nWARC-Type: warcinfo\r\nContent-Length: 0\r\n"
        );
        assert_eq!(count, buf.len());
    }

    #[test]
    fn test_clear() {
        let mut headers = map();
        headers.set_status_line(b"WARC/1.1");
        headers.append("n1", "v1");

        headers.clear();

        assert!(headers.is_empty());
        assert!(headers.status_line_bytes().is_empty());
        assert_eq!(headers.get("n1"), None);
    }

    #[test]
    fn test_status_code_and_reason() {
        let mut headers = HeaderMap::new(HeaderEncoding::Latin1);
        headers.set_status_line(b"HTTP/1.1 404 Not Found");

        assert_eq!(headers.status_code(), Some(404));
        assert_eq!(headers.reason_phrase().as_deref(), Some("Not Found"));

        headers.set_status_line(b"WARC/1.1");
        assert_eq!(headers.status_code(), None);
        assert_eq!(headers.reason_phrase(), None);
    }
}
