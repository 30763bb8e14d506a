use std::{backtrace::Backtrace, fmt::Display, str::Utf8Error};

/// Error for operations that can fail on either the WARC layer or the
/// underlying stream.
#[derive(Debug, thiserror::Error)]
pub enum GeneralError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GeneralError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(..))
    }

    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        if let Self::Protocol(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn try_into_protocol(self) -> Result<ProtocolError, Self> {
        if let Self::Protocol(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(..))
    }

    pub fn as_io(&self) -> Option<&std::io::Error> {
        if let Self::Io(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn try_into_io(self) -> Result<std::io::Error, Self> {
        if let Self::Io(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }
}

/// Violation of the WARC format or misuse of a record operation.
#[derive(Debug, thiserror::Error)]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    context: Box<ProtocolContext>,
    backtrace: Option<Box<Backtrace>>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProtocolError {
    pub fn new(kind: ProtocolErrorKind) -> Self {
        Self {
            kind,
            context: Default::default(),
            backtrace: Some(Box::new(std::backtrace::Backtrace::capture())),
            source: None,
        }
    }

    pub fn with_position(mut self, value: u64) -> Self {
        self.context.position = Some(value);
        self
    }

    pub fn with_snippet<S: Into<String>>(mut self, value: S) -> Self {
        self.context.snippet = Some(value.into());
        self
    }

    pub fn with_source<T: Into<Box<dyn std::error::Error + Send + Sync>>>(
        mut self,
        source: T,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> &ProtocolErrorKind {
        &self.kind
    }

    pub fn position(&self) -> Option<u64> {
        self.context.position
    }

    pub fn snippet(&self) -> Option<&str> {
        self.context.snippet.as_deref()
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "protocol error: {}", self.kind)?;

        if let Some(position) = self.position() {
            write!(f, " position {}", position)?;
        }

        if let Some(snippet) = self.snippet() {
            write!(f, " near '{}'", snippet)?;
        }

        Ok(())
    }
}

impl<T: std::fmt::Debug> From<nom::Err<nom::error::Error<&[T]>>> for ProtocolError {
    fn from(value: nom::Err<nom::error::Error<&[T]>>) -> Self {
        match value {
            nom::Err::Incomplete(_needed) => ProtocolError::new(ProtocolErrorKind::Syntax),
            nom::Err::Error(error) | nom::Err::Failure(error) => {
                ProtocolError::new(ProtocolErrorKind::Syntax)
                    .with_snippet(format!(
                        "{:?}",
                        &error.input[error.input.len().saturating_sub(10)..]
                    ))
                    .with_source(nom::error::Error::new(error.input.len(), error.code))
            }
        }
    }
}

impl From<Utf8Error> for ProtocolError {
    fn from(value: Utf8Error) -> Self {
        ProtocolError::new(ProtocolErrorKind::InvalidUtf8)
            .with_position(value.valid_up_to() as u64)
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum ProtocolErrorKind {
    /// A header line is neither a name-value pair nor a continuation line.
    Syntax,
    /// A header value that must be ASCII or UTF-8 is not.
    InvalidUtf8,
    /// A record header block exceeded the maximum supported size.
    HeaderTooBig,
    /// A record has no Content-Length header.
    NoContentLength,
    /// A record has a non-numeric Content-Length header.
    InvalidContentLength,
    /// A record block is not followed by the two-CRLF terminator.
    InvalidRecordBoundary,
    /// A digest header names an algorithm other than sha1.
    UnsupportedDigest,
    /// A digest header value is not valid base32 or hex.
    InvalidBaseEncodedValue,
    /// An HTTP operation was requested on a record that is not HTTP.
    NotHttpRecord,
    /// A record without an attached payload was asked to serialise itself.
    MissingContent,
}

impl Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax error"),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8"),
            Self::HeaderTooBig => write!(f, "header too big"),
            Self::NoContentLength => write!(f, "no content length"),
            Self::InvalidContentLength => write!(f, "invalid content length"),
            Self::InvalidRecordBoundary => write!(f, "invalid record boundary"),
            Self::UnsupportedDigest => write!(f, "unsupported digest algorithm"),
            Self::InvalidBaseEncodedValue => write!(f, "invalid base encoded value"),
            Self::NotHttpRecord => write!(f, "not an HTTP record"),
            Self::MissingContent => write!(f, "record has no content"),
        }
    }
}

#[derive(Debug, Default)]
struct ProtocolContext {
    position: Option<u64>,
    snippet: Option<String>,
}
