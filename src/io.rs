//! Stream plumbing shared by the archive iterator and the record model.

use std::io::{BufRead, Cursor, Read};

use crate::digest::Hasher;

const WINDOW_LENGTH: usize = 8192;

/// Byte-exact position within the stream read so far.
pub trait LogicalPosition {
    fn logical_position(&self) -> u64;
}

/// Buffered reader over any [`Read`] that tracks the logical stream
/// position.
///
/// The buffer is a fixed window refilled only once it is exhausted, so it
/// never grows or compacts; callers accumulating lines of arbitrary length
/// do so in their own buffers through [`BufRead::read_until`]. Reads larger
/// than the window bypass it when it is empty.
pub struct TrackingReader<R: Read> {
    inner: R,
    window: Box<[u8]>,
    start: usize,
    end: usize,
    position: u64,
}

impl<R: Read> TrackingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            window: vec![0u8; WINDOW_LENGTH].into_boxed_slice(),
            start: 0,
            end: 0,
            position: 0,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn refill(&mut self) -> std::io::Result<usize> {
        self.start = 0;
        self.end = 0;
        self.end = self.inner.read(&mut self.window)?;

        Ok(self.end)
    }
}

impl<R: Read> Read for TrackingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read_len = if self.start == self.end && buf.len() >= self.window.len() {
            self.inner.read(buf)?
        } else {
            if self.start == self.end {
                self.refill()?;
            }

            let available = &self.window[self.start..self.end];
            let read_len = available.len().min(buf.len());
            buf[..read_len].copy_from_slice(&available[..read_len]);
            self.start += read_len;
            read_len
        };

        self.position += read_len as u64;
        Ok(read_len)
    }
}

impl<R: Read> BufRead for TrackingReader<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        if self.start == self.end {
            self.refill()?;
        }

        Ok(&self.window[self.start..self.end])
    }

    fn consume(&mut self, amt: usize) {
        debug_assert!(amt <= self.end - self.start);
        self.start += amt;
        self.position += amt as u64;
    }
}

impl<R: Read> LogicalPosition for TrackingReader<R> {
    fn logical_position(&self) -> u64 {
        self.position
    }
}

/// Reader over exactly the block bytes of one record.
///
/// On the reading path this is a view into the archive's shared reader that
/// becomes empty once the record's declared length has been consumed. On
/// the writing path it wraps an in-memory payload. An optional tee feeds
/// every byte returned into a digest [`Hasher`].
pub struct BodyReader<'a> {
    source: BodySource<'a>,
    tee: Option<Hasher>,
}

enum BodySource<'a> {
    Stream {
        input: &'a mut dyn BufRead,
        remaining: &'a mut u64,
    },
    Bytes(Cursor<Vec<u8>>),
    Empty,
}

impl<'a> BodyReader<'a> {
    pub(crate) fn stream(input: &'a mut dyn BufRead, remaining: &'a mut u64) -> Self {
        Self {
            source: BodySource::Stream { input, remaining },
            tee: None,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            source: BodySource::Bytes(Cursor::new(bytes)),
            tee: None,
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            source: BodySource::Empty,
            tee: None,
        }
    }

    /// Returns whether a payload is attached at all.
    pub(crate) fn has_content(&self) -> bool {
        !matches!(self.source, BodySource::Empty)
    }

    /// Returns the number of unread payload bytes.
    pub fn remaining(&self) -> u64 {
        match &self.source {
            BodySource::Stream { remaining, .. } => **remaining,
            BodySource::Bytes(cursor) => {
                (cursor.get_ref().len() as u64).saturating_sub(cursor.position())
            }
            BodySource::Empty => 0,
        }
    }

    /// Installs a tee that observes every byte subsequently read.
    pub fn set_tee(&mut self, hasher: Hasher) {
        self.tee = Some(hasher);
    }

    /// Removes and returns the tee.
    pub fn take_tee(&mut self) -> Option<Hasher> {
        self.tee.take()
    }

    /// Reads one line, up to and including the next LF, into `line`.
    ///
    /// Returns the number of bytes read; 0 means the payload is exhausted.
    pub fn read_line_bytes(&mut self, line: &mut Vec<u8>) -> std::io::Result<usize> {
        line.clear();

        loop {
            let (done, used) = {
                let available = match &mut self.source {
                    BodySource::Stream { input, remaining } => {
                        let available = input.fill_buf()?;
                        let upper = available
                            .len()
                            .min(usize::try_from(**remaining).unwrap_or(usize::MAX));
                        &available[..upper]
                    }
                    BodySource::Bytes(cursor) => cursor.fill_buf()?,
                    BodySource::Empty => &[],
                };

                if available.is_empty() {
                    (true, 0)
                } else if let Some(i) = available.iter().position(|&b| b == b'\n') {
                    line.extend_from_slice(&available[..=i]);
                    (true, i + 1)
                } else {
                    line.extend_from_slice(available);
                    (false, available.len())
                }
            };

            if used > 0 {
                self.consume_source(used);
            }

            if done {
                break;
            }
        }

        if let Some(tee) = &mut self.tee {
            tee.update(line);
        }

        Ok(line.len())
    }

    fn consume_source(&mut self, amount: usize) {
        match &mut self.source {
            BodySource::Stream { input, remaining } => {
                input.consume(amount);
                **remaining -= amount as u64;
            }
            BodySource::Bytes(cursor) => cursor.consume(amount),
            BodySource::Empty => {}
        }
    }
}

impl Read for BodyReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read_len = match &mut self.source {
            BodySource::Stream { input, remaining } => {
                let upper = buf
                    .len()
                    .min(usize::try_from(**remaining).unwrap_or(usize::MAX));

                if upper == 0 {
                    0
                } else {
                    let read_len = input.read(&mut buf[..upper])?;
                    **remaining -= read_len as u64;
                    read_len
                }
            }
            BodySource::Bytes(cursor) => cursor.read(buf)?,
            BodySource::Empty => 0,
        };

        if read_len > 0 {
            if let Some(tee) = &mut self.tee {
                tee.update(&buf[..read_len]);
            }
        }

        Ok(read_len)
    }
}

impl std::fmt::Debug for BodyReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            BodySource::Stream { .. } => "stream",
            BodySource::Bytes(..) => "bytes",
            BodySource::Empty => "empty",
        };

        f.debug_struct("BodyReader")
            .field("source", &source)
            .field("remaining", &self.remaining())
            .field("teed", &self.tee.is_some())
            .finish()
    }
}
